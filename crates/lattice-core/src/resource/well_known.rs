//! Conventional resource names: `type#instance@note:paragraph`.

/// Resource kinds with a fixed type prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WellKnownResource {
    /// Table produced by a paragraph's `%table` result.
    TableData,
}

impl WellKnownResource {
    pub fn type_name(&self) -> &'static str {
        match self {
            WellKnownResource::TableData => "lattice.interpreter.TableData",
        }
    }
}

/// Instance id of a paragraph's own result.
pub const INSTANCE_RESULT: &str = "result";

/// Name pattern matching any instance id.
pub const INSTANCE_ALL: &str = "[^@]*";

pub fn resource_name(
    resource: WellKnownResource,
    instance_id: &str,
    note_id: &str,
    paragraph_id: &str,
) -> String {
    format!(
        "{}#{}@{}:{}",
        resource.type_name(),
        instance_id,
        note_id,
        paragraph_id
    )
}

/// Name pattern selecting every resource attached to a paragraph.
pub fn resource_name_belongs_to(note_id: &str, paragraph_id: &str) -> String {
    format!(
        "[^@]*[@]{}:{}",
        regex::escape(note_id),
        regex::escape(paragraph_id)
    )
}
