use std::collections::{BTreeMap, HashMap};

use common::model::span::{BriefSpan, Span};

use crate::error::{QuerierError, codes};

/// The root candidate: a span whose parent is not in the map, earliest
/// start first, smallest span id on ties.
pub fn select_root(spans: &BTreeMap<String, Span>) -> Option<&Span> {
    spans
        .values()
        .filter(|s| !spans.contains_key(&s.parent_span_id))
        .min_by(|a, b| {
            a.start_time
                .cmp(&b.start_time)
                .then_with(|| a.span_id.cmp(&b.span_id))
        })
}

struct Frame<'a> {
    node: BriefSpan,
    children: std::slice::Iter<'a, &'a Span>,
}

/// Build the span tree rooted at [`select_root`].
///
/// Children are kept sorted by ascending start time; spans of the same start
/// keep span id order. Spans that are not reachable from the root (other
/// parentless subtrees) are left out of the tree.
pub fn build_trace_tree(spans: &BTreeMap<String, Span>) -> Result<BriefSpan, QuerierError> {
    let root = select_root(spans).ok_or_else(|| {
        QuerierError::internal(
            codes::ROOT_SPAN_NOT_FOUND,
            format!("none of the {} spans is a root span", spans.len()),
        )
    })?;

    let mut index: HashMap<&str, Vec<&Span>> = HashMap::with_capacity(spans.len());
    for span in spans.values() {
        if span.parent_span_id == span.span_id || !spans.contains_key(&span.parent_span_id) {
            continue;
        }
        let siblings = index.entry(span.parent_span_id.as_str()).or_default();
        let pos = siblings.partition_point(|s| s.start_time <= span.start_time);
        siblings.insert(pos, span);
    }

    let children_of = |id: &str| {
        index
            .get(id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
            .iter()
    };

    let mut reached = 1usize;
    let mut stack = vec![Frame {
        node: BriefSpan::from(root),
        children: children_of(&root.span_id),
    }];
    let mut tree = None;

    while let Some(top) = stack.last_mut() {
        if let Some(child) = top.children.next() {
            reached += 1;
            stack.push(Frame {
                node: BriefSpan::from(*child),
                children: children_of(&child.span_id),
            });
            continue;
        }
        if let Some(done) = stack.pop() {
            match stack.last_mut() {
                Some(parent) => parent.node.children.push(done.node),
                None => tree = Some(done.node),
            }
        }
    }

    if reached < spans.len() {
        log::info!(
            "Span tree rooted at {} leaves out {} of {} spans",
            root.span_id,
            spans.len() - reached,
            spans.len()
        );
    }
    tree.ok_or_else(|| {
        QuerierError::internal(codes::ROOT_SPAN_NOT_FOUND, "span tree could not be built")
    })
}

/// Number of levels of the tree, the root being level 1.
pub fn trace_tree_depth(root: Option<&BriefSpan>) -> i32 {
    let Some(root) = root else {
        return 0;
    };

    let mut depth = 0;
    let mut frontier = vec![root];
    while !frontier.is_empty() {
        depth += 1;
        frontier = frontier
            .iter()
            .flat_map(|node| node.children.iter())
            .collect();
    }
    depth
}
