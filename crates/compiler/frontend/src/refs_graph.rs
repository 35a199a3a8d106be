use indexmap::{IndexMap, IndexSet};
use sable_ast::Span;

use crate::diagnostic::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Variable,
    ReferenceMut,
    ReferenceImut,
}

#[derive(Debug, Clone)]
pub struct Node {
    pub name: String,
    pub kind: NodeKind,
    /// Node standing for references stored inside this value, created
    /// lazily for types with references inside.
    pub inner_reference: Option<NodeId>,
    pub span: Span,
}

/// Per-function-body state of the reference analysis. One node per
/// variable, reference binding, or inner-reference slot; a link
/// `(from, to)` records that `to` refers into `from`.
///
/// The graph is cloned at control-flow forks and merged afterwards, so
/// all clones share node identity.
#[derive(Debug, Clone, Default)]
pub struct ReferencesGraph {
    nodes: IndexMap<NodeId, Node>,
    links: IndexSet<(NodeId, NodeId)>,
    moved: IndexSet<NodeId>,
    next_id: u32,
}

impl ReferencesGraph {
    pub fn add_node(&mut self, name: impl Into<String>, kind: NodeKind, span: Span) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id += 1;
        self.nodes.insert(
            id,
            Node {
                name: name.into(),
                kind,
                inner_reference: None,
                span,
            },
        );
        id
    }

    #[inline]
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[&id]
    }

    #[inline]
    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    /// Returns the inner-reference node of `id`, creating it on first
    /// request.
    pub fn inner_reference(&mut self, id: NodeId, kind: NodeKind) -> NodeId {
        if let Some(inner) = self.nodes[&id].inner_reference {
            return inner;
        }
        let name = format!("{} inner reference", self.nodes[&id].name);
        let span = self.nodes[&id].span;
        let inner = self.add_node(name, kind, span);
        self.nodes[&id].inner_reference = Some(inner);
        inner
    }

    pub fn add_link(&mut self, from: NodeId, to: NodeId) {
        if from != to {
            self.links.insert((from, to));
        }
    }

    /// Adds a link enforcing the sharing rules: a mutable reference must
    /// be the only outgoing link of its referent, and an immutable one
    /// may not coexist with a mutable one.
    pub fn try_add_link(&mut self, from: NodeId, to: NodeId) -> Result<(), Error> {
        if from == to {
            return Ok(());
        }
        let to_is_mut = matches!(self.nodes[&to].kind, NodeKind::ReferenceMut);
        let conflict = self
            .outgoing(from)
            .any(|other| other != to && (to_is_mut || matches!(self.nodes[&other].kind, NodeKind::ReferenceMut)));
        if conflict {
            return Err(Error::ReferenceProtectionError(
                self.nodes[&from].name.clone(),
                self.nodes[&to].span,
            ));
        }
        self.links.insert((from, to));
        Ok(())
    }

    #[inline]
    fn outgoing(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.links
            .iter()
            .filter(move |(from, _)| *from == id)
            .map(|(_, to)| *to)
    }

    pub fn has_outgoing_links(&self, id: NodeId) -> bool {
        self.outgoing(id).next().is_some()
    }

    pub fn has_outgoing_mutable_links(&self, id: NodeId) -> bool {
        self.outgoing(id)
            .any(|to| matches!(self.nodes[&to].kind, NodeKind::ReferenceMut))
    }

    /// Nodes the reference `id` points directly into.
    pub fn referents(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.links
            .iter()
            .filter(move |(_, to)| *to == id)
            .map(|(from, _)| *from)
    }

    /// Transitive closure of [`Self::referents`], including `id` itself.
    pub fn reachable_referents(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = vec![id];
        let mut cursor = 0;
        while cursor < out.len() {
            let current = out[cursor];
            cursor += 1;
            for referent in self.referents(current) {
                if !out.contains(&referent) {
                    out.push(referent);
                }
            }
        }
        out
    }

    #[inline]
    pub fn is_moved(&self, id: NodeId) -> bool {
        self.moved.contains(&id)
    }

    /// Marks `id` moved-from. Use-after-move is the caller's check, but
    /// moving out while references are alive is diagnosed here.
    pub fn move_node(&mut self, id: NodeId, span: Span) -> Result<(), Error> {
        if self.has_outgoing_links(id) {
            return Err(Error::MovedVariableHaveReferences(
                self.nodes[&id].name.clone(),
                span,
            ));
        }
        self.moved.insert(id);
        Ok(())
    }

    /// Removes a node at end of its scope. A live outgoing link means
    /// some reference outlives the variable.
    pub fn remove_node(&mut self, id: NodeId, span: Span) -> Result<(), Error> {
        if !self.moved.contains(&id) && self.has_outgoing_links(id) {
            let name = self.nodes[&id].name.clone();
            self.discard_node(id);
            return Err(Error::DestroyedVariableStillHaveReferences(name, span));
        }
        self.discard_node(id);
        Ok(())
    }

    fn discard_node(&mut self, id: NodeId) {
        if let Some(node) = self.nodes.shift_remove(&id) {
            if let Some(inner) = node.inner_reference {
                self.discard_node(inner);
            }
        }
        self.links.retain(|(from, to)| *from != id && *to != id);
        self.moved.shift_remove(&id);
    }

    /// Merges the end states of the branches of an `if`/`else` chain.
    /// `self` is the state before the fork; every branch must already
    /// have removed its branch-local nodes. A variable moved in some
    /// branches but not all is a conditional move.
    pub fn merge_branches(&self, branches: &[ReferencesGraph], span: Span) -> (ReferencesGraph, Vec<Error>) {
        let mut merged = self.clone();
        let mut errors = Vec::new();

        for (&id, node) in &self.nodes {
            let moved_in = branches.iter().filter(|b| b.is_moved(id)).count();
            if moved_in == branches.len() {
                merged.moved.insert(id);
            } else if moved_in > 0 {
                errors.push(Error::ConditionalMove(node.name.clone(), span));
                // Treat as moved so only one error is produced.
                merged.moved.insert(id);
            }
        }
        for branch in branches {
            for &(from, to) in &branch.links {
                if merged.nodes.contains_key(&from) && merged.nodes.contains_key(&to) {
                    merged.links.insert((from, to));
                }
            }
        }
        (merged, errors)
    }

    /// Compares loop-entry state against loop-end state. Moving an outer
    /// variable or creating a new link between outer nodes inside the
    /// body would compound on the second iteration.
    pub fn check_loop_body(&self, after: &ReferencesGraph, span: Span) -> Vec<Error> {
        let mut errors = Vec::new();
        for (&id, node) in &self.nodes {
            if after.is_moved(id) && !self.is_moved(id) {
                errors.push(Error::OuterVariableMoveInsideLoop(node.name.clone(), span));
            }
        }
        for &(from, to) in &after.links {
            if !self.links.contains(&(from, to))
                && self.nodes.contains_key(&from)
                && self.nodes.contains_key(&to)
            {
                errors.push(Error::MutableReferencePollutionOfOuterLoopVariable {
                    dst: self.nodes[&from].name.clone(),
                    src: self.nodes[&to].name.clone(),
                    span,
                });
            }
        }
        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph() -> ReferencesGraph {
        ReferencesGraph::default()
    }

    #[test]
    fn two_immutable_references_are_allowed() {
        let mut g = graph();
        let var = g.add_node("x", NodeKind::Variable, Span::ZERO);
        let r0 = g.add_node("r0", NodeKind::ReferenceImut, Span::ZERO);
        let r1 = g.add_node("r1", NodeKind::ReferenceImut, Span::ZERO);
        assert!(g.try_add_link(var, r0).is_ok());
        assert!(g.try_add_link(var, r1).is_ok());
    }

    #[test]
    fn mutable_reference_is_exclusive() {
        let mut g = graph();
        let var = g.add_node("x", NodeKind::Variable, Span::ZERO);
        let imut = g.add_node("r", NodeKind::ReferenceImut, Span::ZERO);
        let muta = g.add_node("m", NodeKind::ReferenceMut, Span::ZERO);
        assert!(g.try_add_link(var, imut).is_ok());
        assert!(matches!(
            g.try_add_link(var, muta),
            Err(Error::ReferenceProtectionError(name, _)) if name == "x"
        ));
    }

    #[test]
    fn destroyed_variable_with_live_reference() {
        let mut g = graph();
        let var = g.add_node("x", NodeKind::Variable, Span::ZERO);
        let r = g.add_node("r", NodeKind::ReferenceImut, Span::ZERO);
        g.add_link(var, r);
        assert!(matches!(
            g.remove_node(var, Span::ZERO),
            Err(Error::DestroyedVariableStillHaveReferences(name, _)) if name == "x"
        ));
        // Reference removed first, then the variable: fine.
        let mut g = graph();
        let var = g.add_node("x", NodeKind::Variable, Span::ZERO);
        let r = g.add_node("r", NodeKind::ReferenceImut, Span::ZERO);
        g.add_link(var, r);
        assert!(g.remove_node(r, Span::ZERO).is_ok());
        assert!(g.remove_node(var, Span::ZERO).is_ok());
    }

    #[test]
    fn conditional_move_is_reported() {
        let mut g = graph();
        let var = g.add_node("x", NodeKind::Variable, Span::ZERO);

        let mut moved_branch = g.clone();
        moved_branch.move_node(var, Span::ZERO).unwrap();
        let intact_branch = g.clone();

        let (_, errors) = g.merge_branches(&[moved_branch, intact_branch], Span::ZERO);
        assert!(matches!(
            &errors[..],
            [Error::ConditionalMove(name, _)] if name == "x"
        ));

        // Moved in every branch: a plain move, no error.
        let mut b0 = g.clone();
        b0.move_node(var, Span::ZERO).unwrap();
        let mut b1 = g.clone();
        b1.move_node(var, Span::ZERO).unwrap();
        let (merged, errors) = g.merge_branches(&[b0, b1], Span::ZERO);
        assert!(errors.is_empty());
        assert!(merged.is_moved(var));
    }

    #[test]
    fn loop_body_checks() {
        let mut g = graph();
        let var = g.add_node("x", NodeKind::Variable, Span::ZERO);
        let dst = g.add_node("d", NodeKind::Variable, Span::ZERO);
        let before = g.clone();

        let mut after = g.clone();
        after.move_node(var, Span::ZERO).unwrap();
        after.add_link(dst, var);

        let errors = before.check_loop_body(&after, Span::ZERO);
        assert_eq!(errors.len(), 2);
        assert!(errors
            .iter()
            .any(|e| matches!(e, Error::OuterVariableMoveInsideLoop(name, _) if name == "x")));
        assert!(errors.iter().any(|e| matches!(
            e,
            Error::MutableReferencePollutionOfOuterLoopVariable { dst, .. } if dst == "d"
        )));
    }

    #[test]
    fn move_with_live_reference_is_rejected() {
        let mut g = graph();
        let var = g.add_node("x", NodeKind::Variable, Span::ZERO);
        let r = g.add_node("r", NodeKind::ReferenceImut, Span::ZERO);
        g.add_link(var, r);
        assert!(matches!(
            g.move_node(var, Span::ZERO),
            Err(Error::MovedVariableHaveReferences(name, _)) if name == "x"
        ));
    }
}
