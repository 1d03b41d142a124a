// src/bridge.rs

//! Definition construction backends
//!
//! The core never instantiates definitions against a concrete container
//! implementation; it goes through [`ContainerBridge`]. The in-process
//! [`NativeBridge`] is the default. An alternate backend (e.g. one that
//! delegates to an external module container) implements the same trait
//! without the core depending on its types.

use crate::definition::ModuleDefinition;
use crate::descriptor::DescriptorParser;
use crate::error::Result;
use crate::record::ModuleArchiveRecord;
use std::sync::Arc;

/// Narrow seam between the repository core and a definition backend
pub trait ContainerBridge: Send + Sync {
    /// Construct the definition for an archive record
    fn build(&self, record: &Arc<ModuleArchiveRecord>) -> Result<ModuleDefinition>;
}

/// In-process definition backend
pub struct NativeBridge {
    parser: Arc<dyn DescriptorParser>,
}

impl NativeBridge {
    pub fn new(parser: Arc<dyn DescriptorParser>) -> Self {
        Self { parser }
    }
}

impl ContainerBridge for NativeBridge {
    fn build(&self, record: &Arc<ModuleArchiveRecord>) -> Result<ModuleDefinition> {
        Ok(ModuleDefinition::new(record.clone(), self.parser.clone()))
    }
}
