//! Option sources. Each variant knows how to discover entities for its
//! collection and how to produce normalized options for one scan cycle.

pub mod api;
pub mod portal;

pub use api::ApiSource;
pub use portal::PortalSource;

use crate::catalog::Entity;
use crate::error::ScanError;
use crate::matching::{AcademicYear, WindowPolicy};
use crate::options::NormalizedOption;

pub enum Source {
    Api(ApiSource),
    Portal(PortalSource),
}

impl Source {
    pub fn name(&self) -> &str {
        match self {
            Source::Api(s) => s.name(),
            Source::Portal(s) => s.name(),
        }
    }

    pub async fn discover(&self) -> Result<Vec<Entity>, ScanError> {
        match self {
            Source::Api(s) => s.discover().await,
            Source::Portal(s) => s.discover().await,
        }
    }

    pub async fn scan(
        &self,
        policy: &WindowPolicy,
        year: &AcademicYear,
    ) -> Result<Vec<NormalizedOption>, ScanError> {
        match self {
            Source::Api(s) => s.scan(policy, year).await,
            Source::Portal(s) => s.scan(policy, year).await,
        }
    }
}
