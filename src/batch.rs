use uuid::Uuid;

use crate::{
    error::{PipelineError, invalid_request},
    types::{InvocationItem, InvocationRequest, UnitSnapshot},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch<T> {
    /// Position of this batch in the sequence produced by [`make_batches`].
    pub index: usize,
    pub items: Vec<T>,
}

impl<T> Batch<T> {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Splits `items` into contiguous groups of `batch_size`, keeping input order.
/// Only the last group may be shorter.
pub fn make_batches<T: Clone>(
    items: &[T],
    batch_size: usize,
) -> Result<Vec<Batch<T>>, PipelineError> {
    if batch_size == 0 {
        return Err(invalid_request("batch size must be positive"));
    }

    Ok(items
        .chunks(batch_size)
        .enumerate()
        .map(|(index, chunk)| Batch {
            index,
            items: chunk.to_vec(),
        })
        .collect())
}

/// Builds the provider payload for a group of fetched units. Pure; the request id
/// is derived from the unit ids so identical groups produce identical payloads.
pub fn format_for_invocation(batch: &Batch<UnitSnapshot>) -> InvocationRequest {
    let ids = batch
        .items
        .iter()
        .map(|unit| unit.id.to_string())
        .collect::<Vec<_>>()
        .join(",");
    let request_id = Uuid::new_v5(&Uuid::NAMESPACE_OID, ids.as_bytes()).to_string();

    InvocationRequest {
        request_id,
        items: batch
            .items
            .iter()
            .map(|unit| InvocationItem {
                unit_id: unit.id,
                content: unit.content.clone(),
            })
            .collect(),
    }
}
