use rumqttc::{AsyncClient, ClientError, QoS};
use tracing::{debug, info};

use crate::topics::TopicTree;

pub const STATUS_ONLINE: &str = "online";
pub const STATUS_OFFLINE: &str = "offline";

/// Publishes the session-scoped availability topic and the
/// preparing-for-shutdown report.
pub struct StatusManager {
    topics: TopicTree,
    client: AsyncClient,
}

impl StatusManager {
    pub fn new(topics: TopicTree, client: AsyncClient) -> Self {
        Self { topics, client }
    }

    /// Birth message; retained so late subscribers see the current state.
    pub async fn publish_online(&self) -> Result<(), ClientError> {
        info!("publishing status: {STATUS_ONLINE}");
        self.client
            .publish(self.topics.status(), QoS::AtLeastOnce, true, STATUS_ONLINE)
            .await
    }

    /// Orderly-shutdown counterpart of the last will.
    pub async fn publish_offline(&self) -> Result<(), ClientError> {
        info!("publishing status: {STATUS_OFFLINE}");
        self.client
            .publish(self.topics.status(), QoS::AtLeastOnce, true, STATUS_OFFLINE)
            .await
    }

    /// Unretained: the report is only meaningful while the host is actually
    /// transitioning.
    pub async fn publish_preparing_for_shutdown(&self, start: bool) -> Result<(), ClientError> {
        let payload = if start { "true" } else { "false" };
        debug!("publishing preparing-for-shutdown: {payload}");
        self.client
            .publish(
                self.topics.preparing_for_shutdown(),
                QoS::AtLeastOnce,
                false,
                payload,
            )
            .await
    }
}
