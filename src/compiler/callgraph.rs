//! Function dependency graph and its strongly connected components.
//!
//! Edges go from a function to every function it may call: free calls by
//! name, and method calls to every user method with the same name and
//! arity. Components come out callees first, so a function's return
//! summary is computed after those of everything it depends on.

use crate::compiler::contract::ContractState;
use crate::compiler::types::{Capability, FunctionId, FunctionTable};
use std::collections::BTreeSet;

pub struct CallGraph {
    callees: Vec<BTreeSet<FunctionId>>,
}

impl CallGraph {
    pub fn build(contracts: &[ContractState], functions: &FunctionTable) -> Self {
        let mut callees = vec![BTreeSet::new(); contracts.len()];
        for (index, state) in contracts.iter().enumerate() {
            let Some(contract) = state.contract() else {
                continue;
            };
            let edges = &mut callees[index];
            for callee in contract.callees() {
                edges.extend(functions.lookup(&callee));
            }
            for link in contract.return_links() {
                if let Capability::Method { name, arity } = &link.capability {
                    edges.extend(
                        functions
                            .iter()
                            .filter(|f| f.owner.is_some() && f.arity == *arity)
                            .filter(|f| f.name.rsplit('.').next() == Some(name.as_str()))
                            .map(|f| f.id),
                    );
                }
            }
        }
        Self { callees }
    }

    pub fn callees(&self, function: FunctionId) -> &BTreeSet<FunctionId> {
        &self.callees[function.0 as usize]
    }

    pub fn len(&self) -> usize {
        self.callees.len()
    }

    pub fn is_empty(&self) -> bool {
        self.callees.is_empty()
    }

    /// Whether the function is part of a cycle, including calling itself.
    pub fn is_recursive(&self, component: &[FunctionId]) -> bool {
        match component {
            [single] => self.callees(*single).contains(single),
            _ => true,
        }
    }

    /// Strongly connected components in reverse topological order (callees
    /// before callers), found with Tarjan's algorithm.
    pub fn sccs(&self) -> Vec<Vec<FunctionId>> {
        let mut tarjan = Tarjan {
            graph: self,
            index: 0,
            indices: vec![None; self.len()],
            lowlinks: vec![0; self.len()],
            stack: Vec::new(),
            on_stack: vec![false; self.len()],
            components: Vec::new(),
        };
        for v in 0..self.len() {
            if tarjan.indices[v].is_none() {
                tarjan.visit(v);
            }
        }
        tarjan.components
    }
}

struct Tarjan<'a> {
    graph: &'a CallGraph,
    index: usize,
    indices: Vec<Option<usize>>,
    lowlinks: Vec<usize>,
    stack: Vec<usize>,
    on_stack: Vec<bool>,
    components: Vec<Vec<FunctionId>>,
}

impl Tarjan<'_> {
    fn visit(&mut self, v: usize) {
        self.indices[v] = Some(self.index);
        self.lowlinks[v] = self.index;
        self.index += 1;
        self.stack.push(v);
        self.on_stack[v] = true;

        let graph = self.graph;
        for w in graph.callees[v].iter().map(|f| f.0 as usize) {
            match self.indices[w] {
                None => {
                    self.visit(w);
                    self.lowlinks[v] = self.lowlinks[v].min(self.lowlinks[w]);
                }
                Some(index) if self.on_stack[w] => {
                    self.lowlinks[v] = self.lowlinks[v].min(index);
                }
                Some(_) => {}
            }
        }

        if Some(self.lowlinks[v]) == self.indices[v] {
            let mut component = Vec::new();
            while let Some(w) = self.stack.pop() {
                self.on_stack[w] = false;
                component.push(FunctionId(w as u32));
                if w == v {
                    break;
                }
            }
            component.sort();
            self.components.push(component);
        }
    }
}
