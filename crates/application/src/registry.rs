//! In-memory function registry. Control-plane CRUD (deploys, deletes) is
//! the job of an external collaborator; front-ends only read definitions.

use std::{
    collections::HashMap,
    sync::Arc,
};

use common::types::{
    FunctionDefinition,
    FunctionId,
};
use errors::ErrorMetadata;
use parking_lot::RwLock;

#[derive(Clone, Default)]
pub struct FunctionRegistry {
    functions: Arc<RwLock<HashMap<FunctionId, FunctionDefinition>>>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, definition: FunctionDefinition) {
        self.functions
            .write()
            .insert(definition.id.clone(), definition);
    }

    pub fn get(&self, id: &FunctionId) -> Option<FunctionDefinition> {
        self.functions.read().get(id).cloned()
    }

    pub fn require(&self, id: &FunctionId) -> anyhow::Result<FunctionDefinition> {
        self.get(id).ok_or_else(|| {
            anyhow::anyhow!(ErrorMetadata::not_found(
                "FunctionNotFound",
                format!("no function registered under {id}"),
            ))
        })
    }

    pub fn remove(&self, id: &FunctionId) -> bool {
        self.functions.write().remove(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.functions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.read().is_empty()
    }
}
