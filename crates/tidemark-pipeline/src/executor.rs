//! Transformation executor: materializes one dirty node against the
//! warehouse and advances its watermark on success.

use thiserror::Error;
use tidemark_core::{Warehouse, Watermark, WatermarkScope};

use crate::graph::{Node, NodeId};

/// A model the warehouse rejected. Always node-local: it never aborts
/// sibling branches.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("transformation '{node}' failed: {message}")]
pub struct TransformationError {
    pub node: NodeId,
    pub message: String,
}

impl TransformationError {
    pub fn new(node: NodeId, message: impl Into<String>) -> Self {
        Self {
            node,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MaterializationResult {
    pub node: NodeId,
    pub target_table: String,
    /// Watermark recorded for the node: the max dependency watermark at
    /// execution time. `None` when no dependency carried a watermark yet.
    pub watermark: Option<Watermark>,
}

#[derive(Clone)]
pub struct TransformExecutor {
    warehouse: Warehouse,
}

impl TransformExecutor {
    pub fn new(warehouse: Warehouse) -> Self {
        Self { warehouse }
    }

    /// Materialize `node` into its target table.
    ///
    /// `input_watermark` is the max watermark among the node's dependencies,
    /// resolved by the caller from the run's snapshot. The stored node
    /// watermark only ever moves forward; the store clamps regressions.
    pub fn materialize(
        &self,
        node: &Node,
        input_watermark: Option<Watermark>,
    ) -> Result<MaterializationResult, TransformationError> {
        let model = node.model.as_ref().ok_or_else(|| {
            TransformationError::new(node.id.clone(), "node has no model definition")
        })?;

        self.warehouse
            .execute_model(model.target_table.as_str(), model.body.as_str())
            .map_err(|error| TransformationError::new(node.id.clone(), error.to_string()))?;

        if let Some(watermark) = input_watermark {
            self.warehouse
                .advance_watermark(
                    WatermarkScope::Node,
                    node.id.as_str(),
                    watermark.format_rfc3339().as_str(),
                )
                .map_err(|error| TransformationError::new(node.id.clone(), error.to_string()))?;
        }

        Ok(MaterializationResult {
            node: node.id.clone(),
            target_table: model.target_table.clone(),
            watermark: input_watermark,
        })
    }
}
