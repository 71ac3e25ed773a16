//! Pretty-printer and JSON report for analysis results.
//!
//! This module provides human-readable output for debugging the inference
//! pipeline, and a machine-readable report for downstream tooling.

use crate::compiler::contract::{ContractState, InterfaceContract};
use crate::compiler::diagnostics::Diagnostic;
use crate::compiler::engine::{Analysis, ParamResolution};
use crate::compiler::monomorphise::{InstanceState, Instantiation, Layout};
use crate::compiler::resolver::Flow;
use crate::compiler::types::{FunctionId, Ty, TypeTable};
use serde::Serialize;

/// Render a flow the way diagnostics name types.
pub fn display_flow(table: &TypeTable, flow: &Flow) -> String {
    match flow {
        Flow::Known(ty) => table.display(ty),
        Flow::Bound(class) => format!("impl {}", table.name(*class)),
        Flow::Open => "?".to_string(),
        Flow::Pending => "pending".to_string(),
    }
}

fn display_resolution(table: &TypeTable, resolution: &ParamResolution) -> String {
    match resolution {
        ParamResolution::Concrete(id) => table.name(*id).to_string(),
        ParamResolution::AbstractBound(id) => format!("impl {}", table.name(*id)),
        ParamResolution::Intersection(id) => table.display(&Ty::Intersection(*id)),
        ParamResolution::Open { candidates, .. } => {
            let names: Vec<&str> = candidates.iter().map(|c| table.name(*c)).collect();
            format!("open [{}]", names.join(", "))
        }
    }
}

fn layout_name(layout: &Layout) -> String {
    match layout {
        Layout::Void => "void".to_string(),
        Layout::Scalar => "scalar".to_string(),
        Layout::Record { fields } => format!("record({})", fields.join(", ")),
        Layout::Tagged { variants, tag_bits } => {
            format!("tagged({}; {} bits)", variants.join(" | "), tag_bits)
        }
        Layout::Dyn { capabilities } => format!("dyn({})", capabilities.join(", ")),
    }
}

fn state_name(state: InstanceState) -> &'static str {
    match state {
        InstanceState::InProgress => "in progress",
        InstanceState::Resolved => "resolved",
        InstanceState::Stale => "stale",
        InstanceState::Failed => "failed",
    }
}

/// Tree printer for an [`Analysis`].
pub struct AnalysisPrinter<'a> {
    analysis: &'a Analysis,
    output: String,
}

impl<'a> AnalysisPrinter<'a> {
    pub fn new(analysis: &'a Analysis) -> Self {
        Self {
            analysis,
            output: String::new(),
        }
    }

    pub fn print(&mut self) -> &str {
        self.writeln("Analysis");
        let analysis = self.analysis;
        let table = &analysis.table;

        let mut sections: Vec<Box<dyn Fn(&mut Self, &str, &str) + 'a>> = Vec::new();
        for (index, state) in analysis.contracts.iter().enumerate() {
            sections.push(Box::new(move |p: &mut Self, prefix: &str, child: &str| {
                p.print_contract(FunctionId(index as u32), state, prefix, child)
            }));
        }
        for instance in analysis.cache.all() {
            sections.push(Box::new(move |p: &mut Self, prefix: &str, child: &str| {
                p.print_instantiation(&instance, prefix, child)
            }));
        }
        for intersection in table.intersections().all() {
            sections.push(Box::new(move |p: &mut Self, prefix: &str, _: &str| {
                let names: Vec<&str> = intersection.members.iter().map(|m| table.name(*m)).collect();
                let caps: Vec<String> = intersection.capabilities.iter().map(|c| c.to_string()).collect();
                p.writeln(&format!(
                    "{}Intersection: {} [{} tag bits] {{{}}}",
                    prefix,
                    names.join(" & "),
                    intersection.tag_bits,
                    caps.join(", ")
                ));
            }));
        }
        for descriptor in table.dyns().all() {
            sections.push(Box::new(move |p: &mut Self, prefix: &str, _: &str| {
                let retained: Vec<&str> = descriptor.retained.iter().map(|m| table.name(*m)).collect();
                let caps: Vec<String> = descriptor.capabilities.iter().map(|c| c.to_string()).collect();
                let function = &analysis.functions.get(descriptor.origin.function).name;
                p.writeln(&format!(
                    "{}Dyn #{} in {}: {{{}}} retains {}",
                    prefix,
                    descriptor.id.0,
                    function,
                    caps.join(", "),
                    retained.join(", ")
                ));
            }));
        }
        for diagnostic in &analysis.diagnostics {
            sections.push(Box::new(move |p: &mut Self, prefix: &str, _: &str| {
                p.print_diagnostic(diagnostic, prefix)
            }));
        }

        let count = sections.len();
        for (i, section) in sections.iter().enumerate() {
            let is_last = i == count - 1;
            let prefix = if is_last { "└── " } else { "├── " };
            let child = if is_last { "    " } else { "│   " };
            section(self, prefix, child);
        }
        &self.output
    }

    fn print_contract(&mut self, id: FunctionId, state: &ContractState, prefix: &str, parent_prefix: &str) {
        let name = self.analysis.functions.get(id).name.clone();
        match state {
            ContractState::Unresolved(errors) => {
                self.writeln(&format!("{}Contract: {} (unresolved)", prefix, name));
                for (i, error) in errors.iter().enumerate() {
                    let last = i == errors.len() - 1;
                    let branch = if last { "└── " } else { "├── " };
                    self.writeln(&format!("{}{}{:?}: {}", parent_prefix, branch, error.kind(), error));
                }
            }
            ContractState::Resolved(contract) => {
                let params: Vec<&str> = (0..contract.params.len()).map(|i| contract.param_name(i)).collect();
                self.writeln(&format!("{}Contract: {}({})", prefix, name, params.join(", ")));
                let lines = self.contract_lines(id, contract);
                for (i, line) in lines.iter().enumerate() {
                    let branch = if i == lines.len() - 1 { "└── " } else { "├── " };
                    self.writeln(&format!("{}{}{}", parent_prefix, branch, line));
                }
            }
        }
    }

    fn contract_lines(&self, id: FunctionId, contract: &InterfaceContract) -> Vec<String> {
        let table = &self.analysis.table;
        let statics = self.analysis.statics[id.0 as usize].as_ref();
        let mut lines = Vec::new();
        for index in 0..contract.params.len() {
            let caps: Vec<String> = contract
                .param_capabilities(index)
                .iter()
                .map(|c| c.to_string())
                .collect();
            let resolved = statics
                .and_then(|s| s.params.get(index))
                .map(|r| format!(" => {}", display_resolution(table, r)))
                .unwrap_or_default();
            lines.push(format!("{}: {{{}}}{}", contract.param_name(index), caps.join(", "), resolved));
        }
        for link in contract.return_links() {
            let requirements = contract.capabilities(link.result);
            if requirements.is_empty() {
                continue;
            }
            let caps: Vec<String> = requirements.iter().map(|c| c.to_string()).collect();
            lines.push(format!(
                "link: {} returns {{{}}}",
                contract.var(link.result).description,
                caps.join(", ")
            ));
        }
        if let Some(statics) = statics {
            lines.push(format!("return: {}", display_flow(table, &statics.ret)));
        }
        lines
    }

    fn print_instantiation(&mut self, instance: &Instantiation, prefix: &str, parent_prefix: &str) {
        let table = &self.analysis.table;
        self.writeln(&format!(
            "{}Instantiation: {} -> {} [{}]",
            prefix,
            instance.mangled_name,
            display_flow(table, &instance.ret),
            state_name(instance.state)
        ));
        let count = instance.args.len();
        for (i, (ty, layout)) in instance.args.iter().zip(&instance.layouts).enumerate() {
            let branch = if i == count - 1 { "└── " } else { "├── " };
            let line = format!(
                "{}{}arg {}: {} ({})",
                parent_prefix,
                branch,
                i,
                table.display(ty),
                layout_name(layout)
            );
            self.writeln(&line);
        }
    }

    fn print_diagnostic(&mut self, diagnostic: &Diagnostic, prefix: &str) {
        let function = diagnostic.function.as_deref().unwrap_or("-");
        self.writeln(&format!(
            "{}{}[{}] in {} at {}: {}",
            prefix,
            diagnostic.severity,
            diagnostic.kind(),
            function,
            diagnostic.span(),
            diagnostic.error
        ));
    }

    fn writeln(&mut self, s: &str) {
        self.output.push_str(s);
        self.output.push('\n');
    }
}

/// Format an analysis as a tree.
pub fn format_analysis(analysis: &Analysis) -> String {
    let mut printer = AnalysisPrinter::new(analysis);
    printer.print().to_string()
}

#[derive(Debug, Serialize)]
pub struct Report {
    pub success: bool,
    pub contracts: Vec<ContractReport>,
    pub instantiations: Vec<InstantiationReport>,
    pub intersections: Vec<IntersectionReport>,
    pub dyns: Vec<DynReport>,
    pub diagnostics: Vec<DiagnosticReport>,
}

#[derive(Debug, Serialize)]
pub struct ContractReport {
    pub function: String,
    pub resolved: bool,
    pub params: Vec<ParamReport>,
    pub ret: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ParamReport {
    pub name: String,
    pub capabilities: Vec<String>,
    pub resolution: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct InstantiationReport {
    pub mangled_name: String,
    pub function: String,
    pub args: Vec<String>,
    pub layouts: Vec<Layout>,
    pub ret: String,
    pub state: InstanceState,
}

#[derive(Debug, Serialize)]
pub struct IntersectionReport {
    pub members: Vec<String>,
    pub capabilities: Vec<String>,
    pub tag_bits: u32,
}

#[derive(Debug, Serialize)]
pub struct DynReport {
    pub function: String,
    pub capabilities: Vec<String>,
    pub retained: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct DiagnosticReport {
    pub severity: String,
    pub kind: String,
    pub function: Option<String>,
    pub message: String,
    pub line: usize,
    pub column: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chain: Option<Vec<String>>,
}

pub fn report(analysis: &Analysis) -> Report {
    let table = &analysis.table;
    let contracts = analysis
        .contracts
        .iter()
        .enumerate()
        .map(|(index, state)| {
            let function = analysis.functions.get(FunctionId(index as u32)).name.clone();
            let statics = analysis.statics[index].as_ref();
            match state.contract() {
                Some(contract) => ContractReport {
                    function,
                    resolved: true,
                    params: (0..contract.params.len())
                        .map(|i| ParamReport {
                            name: contract.param_name(i).to_string(),
                            capabilities: contract
                                .param_capabilities(i)
                                .iter()
                                .map(|c| c.to_string())
                                .collect(),
                            resolution: statics
                                .and_then(|s| s.params.get(i))
                                .map(|r| display_resolution(table, r)),
                        })
                        .collect(),
                    ret: statics.map(|s| display_flow(table, &s.ret)),
                },
                None => ContractReport {
                    function,
                    resolved: false,
                    params: Vec::new(),
                    ret: None,
                },
            }
        })
        .collect();

    let instantiations = analysis
        .cache
        .all()
        .into_iter()
        .map(|i| InstantiationReport {
            function: i.name.clone(),
            args: i.args.iter().map(|ty| table.display(ty)).collect(),
            ret: display_flow(table, &i.ret),
            mangled_name: i.mangled_name,
            layouts: i.layouts,
            state: i.state,
        })
        .collect();

    let intersections = table
        .intersections()
        .all()
        .into_iter()
        .map(|i| IntersectionReport {
            members: i.members.iter().map(|m| table.name(*m).to_string()).collect(),
            capabilities: i.capabilities.iter().map(|c| c.to_string()).collect(),
            tag_bits: i.tag_bits,
        })
        .collect();

    let dyns = table
        .dyns()
        .all()
        .into_iter()
        .map(|d| DynReport {
            function: analysis.functions.get(d.origin.function).name.clone(),
            capabilities: d.capabilities.iter().map(|c| c.to_string()).collect(),
            retained: d.retained.iter().map(|m| table.name(*m).to_string()).collect(),
        })
        .collect();

    let diagnostics = analysis
        .diagnostics
        .iter()
        .map(|d| DiagnosticReport {
            severity: d.severity.to_string(),
            kind: d.kind().to_string(),
            function: d.function.clone(),
            message: d.error.to_string(),
            line: d.span().line,
            column: d.span().column,
            chain: d.error.chain().map(|c| c.to_vec()),
        })
        .collect();

    Report {
        success: analysis.is_success(),
        contracts,
        instantiations,
        intersections,
        dyns,
        diagnostics,
    }
}

/// Serialize the analysis report as pretty-printed JSON.
pub fn report_json(analysis: &Analysis) -> Result<String, String> {
    serde_json::to_string_pretty(&report(analysis)).map_err(|e| format!("failed to serialize report: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::ast::{AstBuilder, BinaryOp, Item, Program};
    use crate::compiler::engine::analyze;
    use crate::config::EngineConfig;

    fn add_and_main() -> Program {
        let mut b = AstBuilder::new();
        let lhs = b.ident("a");
        let rhs = b.ident("b");
        let sum = b.binary(BinaryOp::Add, lhs, rhs);
        let ret = b.ret(sum);
        let add = b.function("add", &["a", "b"], vec![ret]);
        let one = b.int(1);
        let two = b.int(2);
        let call = b.call("add", vec![one, two]);
        let ret = b.ret(call);
        let main = b.function("main", &[], vec![ret]);
        Program {
            items: vec![Item::Function(add), Item::Function(main)],
        }
    }

    #[test]
    fn test_tree_output() {
        let analysis = analyze(&add_and_main(), &EngineConfig::default());
        let output = format_analysis(&analysis);
        assert!(output.starts_with("Analysis\n"));
        assert!(output.contains("Contract: add(a, b)"));
        assert!(output.contains("a: {plus/2} => open [int, float, str]"));
        assert!(output.contains("Instantiation: add__int_int -> int [resolved]"));
        assert!(output.contains("arg 0: int (scalar)"));
    }

    #[test]
    fn test_json_report() {
        let analysis = analyze(&add_and_main(), &EngineConfig::default());
        let json: serde_json::Value = serde_json::from_str(&report_json(&analysis).unwrap()).unwrap();
        assert_eq!(json["success"], true);
        let instances = json["instantiations"].as_array().unwrap();
        let add = instances
            .iter()
            .find(|i| i["mangled_name"] == "add__int_int")
            .unwrap();
        assert_eq!(add["ret"], "int");
        assert_eq!(add["state"], "Resolved");
    }
}
