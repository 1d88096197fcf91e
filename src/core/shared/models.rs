use serde::Serialize;

/// Response body for soft deletes. `cascaded` counts dependent rows that were
/// soft-deleted (or detached) in the same transaction.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DeletedResponse {
    pub success: bool,
    pub id: i32,
    pub cascaded: usize,
}

impl DeletedResponse {
    pub fn new(id: i32, cascaded: usize) -> Self {
        Self {
            success: true,
            id,
            cascaded,
        }
    }
}
