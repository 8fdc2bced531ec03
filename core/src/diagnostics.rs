//! Instruction tree dumps
//!
//! Both forms visit every instruction exactly once, in tree order, and are
//! deterministic for a given entity.

use indexmap::IndexMap;
use serde::Serialize;
use std::fmt::Write;

use crate::tag::{Entity, Instruction, InstructionTree};

/// One line per instruction, indented by depth:
///
/// ```text
/// <tag> impl line N of 'name' [field=value, ...]
/// ```
pub fn dump(entity: &Entity) -> String {
    let Some(tree) = entity.tree() else {
        return format!("<{}> of '{}' (not parsed)\n", entity.root_tag(), entity.name());
    };
    let name = entity.name();
    let mut out = String::new();
    for (depth, node) in tree.walk() {
        let _ = write!(
            out,
            "{:indent$}<{}> {} line {} of '{}'",
            "",
            node.tag_name,
            node.tag.type_name(),
            node.line,
            name,
            indent = depth * 2
        );
        let fields = node.tag.fields();
        if !fields.is_empty() {
            let rendered: Vec<String> = fields.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
            let _ = write!(out, " [{}]", rendered.join(", "));
        }
        out.push('\n');
    }
    out
}

/// Serializable form of an instruction subtree
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DumpNode {
    pub tag: String,
    pub implementation: String,
    pub line: usize,
    pub resource: String,
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub fields: IndexMap<String, String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<DumpNode>,
}

pub fn dump_tree(entity: &Entity) -> Option<DumpNode> {
    let tree = entity.tree()?;
    Some(dump_node(tree, tree.root(), &entity.name()))
}

pub fn dump_json(entity: &Entity) -> serde_json::Result<String> {
    serde_json::to_string_pretty(&dump_tree(entity))
}

fn dump_node(tree: &InstructionTree, node: &Instruction, resource: &str) -> DumpNode {
    DumpNode {
        tag: node.tag_name.clone(),
        implementation: node.tag.type_name().to_string(),
        line: node.line,
        resource: resource.to_string(),
        fields: node
            .tag
            .fields()
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect(),
        children: node
            .children
            .iter()
            .map(|id| dump_node(tree, tree.node(*id), resource))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::init::EngineBuilder;

    #[test]
    fn test_dump_visits_every_node_once() {
        let engine = EngineBuilder::new()
            .source("main", "<scenario>\n  <log level=\"warn\" value=\"hi\"/>\n</scenario>")
            .build()
            .unwrap();
        let entity = engine.parser().load("main").unwrap();

        let text = dump(&entity);
        assert_eq!(text.lines().count(), entity.tree().unwrap().len());
        assert!(text.starts_with("<scenario> scenario line 1 of 'main'\n  <log> log line 2 of 'main' [level=info]\n"));

        let tree = dump_tree(&entity).unwrap();
        assert_eq!(tree.children.len(), 1);
        let log = &tree.children[0];
        assert_eq!(log.implementation, "log");
        assert_eq!(log.fields.get("level").map(String::as_str), Some("info"));
        assert_eq!(
            log.children.iter().map(|c| c.tag.as_str()).collect::<Vec<_>>(),
            vec!["level", "value"]
        );

        let json: serde_json::Value = serde_json::from_str(&dump_json(&entity).unwrap()).unwrap();
        assert_eq!(json["tag"], "scenario");
        assert_eq!(json["children"][0]["line"], 2);
    }
}
