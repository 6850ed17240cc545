//! Plan trees as returned by `EXPLAIN`.

use std::fmt;

use serde::Serialize;

/// One node of an explained plan.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Explanation {
    pub id: u64,
    pub node: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entropy: Option<f64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Explanation>,
}

impl Explanation {
    pub fn new(id: u64, node: &str) -> Self {
        Self {
            id,
            node: node.to_string(),
            detail: None,
            entropy: None,
            children: Vec::new(),
        }
    }

    pub fn leaf(id: u64, node: &str, detail: impl Into<String>) -> Self {
        Self::new(id, node).with_detail(detail)
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_entropy(mut self, entropy: Option<f64>) -> Self {
        self.entropy = entropy;
        self
    }

    pub fn with_child(mut self, child: Explanation) -> Self {
        self.children.push(child);
        self
    }

    /// First node of kind `node`, depth first.
    pub fn find(&self, node: &str) -> Option<&Explanation> {
        if self.node == node {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(node))
    }

    /// Kinds of every node, depth first.
    pub fn node_kinds(&self) -> Vec<&str> {
        let mut kinds = vec![self.node.as_str()];
        for child in &self.children {
            kinds.extend(child.node_kinds());
        }
        kinds
    }

    fn render(&self, depth: usize, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:indent$}{} #{}", "", self.node, self.id, indent = depth * 2)?;
        if let Some(detail) = &self.detail {
            write!(f, " [{}]", detail)?;
        }
        if let Some(entropy) = self.entropy {
            write!(f, " (entropy={:.1})", entropy)?;
        }
        writeln!(f)?;
        for child in &self.children {
            child.render(depth + 1, f)?;
        }
        Ok(())
    }
}

impl fmt::Display for Explanation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.render(0, f)
    }
}
