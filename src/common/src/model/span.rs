use serde::{Deserialize, Serialize};

use uniquery_api::trace::{BriefSpanNode, SpanDetailResponse};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SpanStatus {
    Unset,
    Ok,
    Error,
}

impl SpanStatus {
    pub const ALL: [SpanStatus; 3] = [SpanStatus::Unset, SpanStatus::Ok, SpanStatus::Error];

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Unset" | "Unspecified" => Some(SpanStatus::Unset),
            "Ok" => Some(SpanStatus::Ok),
            "Error" => Some(SpanStatus::Error),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SpanStatus::Unset => "Unset",
            SpanStatus::Ok => "Ok",
            SpanStatus::Error => "Error",
        }
    }
}

/// A span as decoded from one search hit. Times are nanosecond epochs.
#[derive(Clone, Debug, PartialEq)]
pub struct Span {
    pub trace_id: String,
    pub span_id: String,
    /// Empty when the span has no parent
    pub parent_span_id: String,
    pub name: String,
    pub span_kind: String,
    pub service_name: String,
    pub start_time: i64,
    pub end_time: i64,
    pub duration: i64,
    pub status: SpanStatus,
    pub related_log_count: i64,
}

impl Span {
    pub fn has_parent(&self) -> bool {
        !self.parent_span_id.is_empty()
    }
}

/// Node of the assembled span tree.
#[derive(Clone, Debug, PartialEq)]
pub struct BriefSpan {
    pub key: String,
    pub parent_span_id: String,
    pub name: String,
    pub service_name: String,
    pub span_kind: String,
    pub start_time: i64,
    pub end_time: i64,
    pub duration: i64,
    pub status: SpanStatus,
    pub related_log_count: i64,
    /// Sorted by ascending start time
    pub children: Vec<BriefSpan>,
}

impl From<&Span> for BriefSpan {
    fn from(span: &Span) -> Self {
        Self {
            key: span.span_id.clone(),
            parent_span_id: span.parent_span_id.clone(),
            name: span.name.clone(),
            service_name: span.service_name.clone(),
            span_kind: span.span_kind.clone(),
            start_time: span.start_time,
            end_time: span.end_time,
            duration: span.duration,
            status: span.status,
            related_log_count: span.related_log_count,
            children: Vec::new(),
        }
    }
}

impl From<BriefSpan> for BriefSpanNode {
    fn from(span: BriefSpan) -> Self {
        Self {
            key: span.key,
            parent_span_id: span.parent_span_id,
            name: span.name,
            service_name: span.service_name,
            span_kind: span.span_kind,
            start_time: span.start_time,
            end_time: span.end_time,
            duration: span.duration,
            status: span.status.as_str().to_string(),
            related_log_count: span.related_log_count,
            children: span.children.into_iter().map(BriefSpanNode::from).collect(),
        }
    }
}

impl From<Span> for SpanDetailResponse {
    fn from(span: Span) -> Self {
        Self {
            trace_id: span.trace_id,
            span_id: span.span_id,
            parent_span_id: span.parent_span_id,
            name: span.name,
            span_kind: span.span_kind,
            service_name: span.service_name,
            start_time: span.start_time,
            end_time: span.end_time,
            duration: span.duration,
            status: span.status.as_str().to_string(),
            related_log_count: span.related_log_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span(id: &str, parent: &str) -> Span {
        Span {
            trace_id: "t".to_string(),
            span_id: id.to_string(),
            parent_span_id: parent.to_string(),
            name: format!("op-{id}"),
            span_kind: "Server".to_string(),
            service_name: "cart".to_string(),
            start_time: 100,
            end_time: 250,
            duration: 150,
            status: SpanStatus::Ok,
            related_log_count: 2,
        }
    }

    #[test]
    fn test_status_parse() {
        assert_eq!(SpanStatus::parse("Ok"), Some(SpanStatus::Ok));
        assert_eq!(SpanStatus::parse("Unspecified"), Some(SpanStatus::Unset));
        assert_eq!(SpanStatus::parse("ok"), None);
    }

    #[test]
    fn test_brief_span_to_wire_node() {
        let mut root = BriefSpan::from(&span("a", ""));
        root.children.push(BriefSpan::from(&span("b", "a")));

        let node = BriefSpanNode::from(root);
        assert_eq!(node.key, "a");
        assert_eq!(node.status, "Ok");
        assert_eq!(node.children.len(), 1);
        assert_eq!(node.children[0].parent_span_id, "a");
    }

    #[test]
    fn test_has_parent() {
        assert!(!span("a", "").has_parent());
        assert!(span("b", "a").has_parent());
    }
}
