//! Typed resource identifiers.
//!
//! Every record kind gets its own newtype so a run id can never be passed
//! where a job id is expected. All ids are UUIDv7 (time-ordered).

use derive_more::Display;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! resource_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display)]
        #[serde(transparent)]
        #[display("{_0}")]
        pub struct $name(Uuid);

        impl $name {
            /// Create a new time-ordered id.
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                Ok(Self(Uuid::parse_str(s)?))
            }
        }
    };
}

resource_id!(
    /// Identifier of a queued job.
    JobId
);
resource_id!(
    /// Identifier of a project (owns pipelines and webhooks).
    ProjectId
);
resource_id!(
    /// Identifier of a pipeline definition.
    PipelineId
);
resource_id!(
    /// Identifier of a single pipeline run.
    RunId
);
resource_id!(
    /// Identifier of a registered inbound webhook.
    WebhookId
);
resource_id!(
    /// Identifier of a webhook delivery audit record.
    DeliveryId
);
