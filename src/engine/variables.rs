// ABOUTME: Runtime variable loading for instance execution
// ABOUTME: Lets deployments merge fresh CRM data over the instance's stored variables

use async_trait::async_trait;

use crate::model::VariableBag;
use crate::Result;

/// Supplies up-to-date variables for an instance each time the engine
/// advances it. The result is merged over the instance's stored bag, so
/// fresh values win without losing stored ones.
#[async_trait]
pub trait RuntimeVariableSource: Send + Sync {
    async fn load(&self, instance_id: &str) -> Result<VariableBag>;
}

/// Source that always returns the same bag. The default when no live
/// data feed is wired up.
#[derive(Debug, Clone, Default)]
pub struct StaticVariableSource {
    bag: VariableBag,
}

impl StaticVariableSource {
    pub fn new(bag: VariableBag) -> Self {
        Self { bag }
    }

    pub fn empty() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RuntimeVariableSource for StaticVariableSource {
    async fn load(&self, _instance_id: &str) -> Result<VariableBag> {
        Ok(self.bag.clone())
    }
}
