//! 消息发布抽象
//!
//! 钱包服务发布领域事件，消费者发布通知事件、写入死信，都经由 `EventPublisher`，
//! 测试中以 mock 或内存实现替换。

use async_trait::async_trait;
use casino_shared::config::PubSubConfig;
use casino_shared::error::CasinoError;
use casino_shared::events::{EventPayload, NotificationEvent};
use casino_shared::pubsub::{ChannelMessage, RedisPublisher};
use tracing::debug;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish_event(&self, event: &EventPayload) -> Result<(), CasinoError>;

    async fn publish_notification(&self, notification: &NotificationEvent)
    -> Result<(), CasinoError>;

    async fn push_dead_letter(&self, message: &ChannelMessage, error: &str)
    -> Result<(), CasinoError>;
}

/// 基于 Redis pub/sub 的发布者
pub struct RedisEventPublisher {
    publisher: RedisPublisher,
    channels: PubSubConfig,
}

impl RedisEventPublisher {
    pub fn new(publisher: RedisPublisher, channels: PubSubConfig) -> Self {
        Self {
            publisher,
            channels,
        }
    }
}

#[async_trait]
impl EventPublisher for RedisEventPublisher {
    async fn publish_event(&self, event: &EventPayload) -> Result<(), CasinoError> {
        self.publisher
            .publish_json(&self.channels.event_channel, event)
            .await?;
        debug!(event_id = %event.event_id, event_type = %event.event_type, "领域事件已发布");
        Ok(())
    }

    async fn publish_notification(
        &self,
        notification: &NotificationEvent,
    ) -> Result<(), CasinoError> {
        self.publisher
            .publish_json(&self.channels.notification_channel, notification)
            .await?;
        debug!(
            notification_id = %notification.notification_id,
            user_id = %notification.user_id,
            "通知事件已发布"
        );
        Ok(())
    }

    async fn push_dead_letter(
        &self,
        message: &ChannelMessage,
        error: &str,
    ) -> Result<(), CasinoError> {
        self.publisher.push_dead_letter(message, error).await
    }
}
