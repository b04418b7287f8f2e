//! Redis pub/sub 消费者
//!
//! 订阅领域事件通道和活动重载通道。每条领域事件的处理流程：
//! 反序列化 -> 幂等检查 -> 处理（可重试错误按退避重试）-> 标记已处理 -> 发布通知。
//! 反序列化失败或重试耗尽的消息写入死信列表。

use std::sync::Arc;

use casino_shared::config::PubSubConfig;
use casino_shared::error::CasinoError;
use casino_shared::events::{
    BonusMovement, EventPayload, EventProcessor, EventResult, MovementKind, NotificationChannel,
    NotificationEvent, NotificationType,
};
use casino_shared::pubsub::{ChannelMessage, RedisSubscriber};
use casino_shared::retry::{RetryPolicy, retry_with_policy};
use serde_json::json;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::publisher::EventPublisher;
use crate::service::CampaignService;

/// 单条消息的处理结果
#[derive(Debug)]
pub enum HandleOutcome {
    /// 活动配置已重载
    Reloaded,
    /// 事件此前已处理
    Duplicate,
    Processed(EventResult),
    DeadLettered(String),
}

/// 消息处理器，不依赖订阅连接，便于单独测试
pub struct MessageHandler {
    processor: Arc<dyn EventProcessor>,
    campaigns: Arc<CampaignService>,
    publisher: Arc<dyn EventPublisher>,
    policy: RetryPolicy,
    channels: PubSubConfig,
}

impl MessageHandler {
    pub fn new(
        processor: Arc<dyn EventProcessor>,
        campaigns: Arc<CampaignService>,
        publisher: Arc<dyn EventPublisher>,
        policy: RetryPolicy,
        channels: PubSubConfig,
    ) -> Self {
        Self {
            processor,
            campaigns,
            publisher,
            policy,
            channels,
        }
    }

    pub async fn handle(&self, msg: &ChannelMessage) -> Result<HandleOutcome, CasinoError> {
        if msg.channel == self.channels.campaign_reload_channel {
            self.campaigns.invalidate().await;
            return Ok(HandleOutcome::Reloaded);
        }

        let event: EventPayload = match msg.deserialize_payload() {
            Ok(event) => event,
            Err(e) => {
                warn!(channel = %msg.channel, error = %e, "事件反序列化失败");
                return self.dead_letter(msg, e.to_string()).await;
            }
        };

        info!(
            event_id = %event.event_id,
            event_type = %event.event_type,
            user_id = %event.user_id,
            "收到领域事件"
        );

        // 幂等标记读取失败时继续处理，奖金流水的唯一约束保证不会重复发放
        match self.processor.is_processed(&event.event_id).await {
            Ok(true) => return Ok(HandleOutcome::Duplicate),
            Ok(false) => {}
            Err(e) => warn!(event_id = %event.event_id, error = %e, "读取幂等标记失败，继续处理"),
        }

        let processed = retry_with_policy(
            &self.policy,
            "process_bonus_event",
            CasinoError::is_retryable,
            || self.processor.process(&event),
        )
        .await;

        let result = match processed {
            Ok(result) => result,
            Err(e) => {
                error!(event_id = %event.event_id, error = %e, "奖金事件处理失败");
                return self.dead_letter(msg, e.to_string()).await;
            }
        };

        if let Err(e) = self.processor.mark_processed(&event.event_id).await {
            warn!(event_id = %event.event_id, error = %e, "标记事件为已处理失败");
        }

        for notification in build_notifications(&event, &result) {
            if let Err(e) = self.publisher.publish_notification(&notification).await {
                warn!(
                    event_id = %event.event_id,
                    notification_id = %notification.notification_id,
                    error = %e,
                    "发布通知失败"
                );
            }
        }

        Ok(HandleOutcome::Processed(result))
    }

    async fn dead_letter(
        &self,
        msg: &ChannelMessage,
        reason: String,
    ) -> Result<HandleOutcome, CasinoError> {
        if let Err(e) = self.publisher.push_dead_letter(msg, &reason).await {
            error!(channel = %msg.channel, error = %e, "写入死信队列失败，消息可能丢失");
            return Err(e);
        }
        Ok(HandleOutcome::DeadLettered(reason))
    }
}

/// 为每笔奖金变动生成通知
///
/// 事件携带手机号（`data.user.phone`）时，没收和过期通知同时发送短信。
/// 最后一个阶段释放后追加一条活动完成通知。
pub fn build_notifications(event: &EventPayload, result: &EventResult) -> Vec<NotificationEvent> {
    let phone = event
        .data
        .get("user")
        .and_then(|u| u.get("phone"))
        .and_then(|p| p.as_str());

    let mut notifications = Vec::new();
    for movement in &result.bonus_movements {
        let mut channels = vec![NotificationChannel::Push];
        if phone.is_some() && matches!(movement.kind, MovementKind::Forfeit | MovementKind::Expire) {
            channels.push(NotificationChannel::Sms);
        }

        notifications.push(NotificationEvent::new(
            event.user_id.clone(),
            NotificationType::from(movement.kind),
            notification_data(event, movement, phone),
            channels,
        ));

        if movement.campaign_completed && movement.kind == MovementKind::StageRelease {
            notifications.push(NotificationEvent::new(
                event.user_id.clone(),
                NotificationType::CampaignCompleted,
                notification_data(event, movement, phone),
                vec![NotificationChannel::Push],
            ));
        }
    }
    notifications
}

fn notification_data(
    event: &EventPayload,
    movement: &BonusMovement,
    phone: Option<&str>,
) -> serde_json::Value {
    let mut data = json!({
        "campaignId": movement.campaign_id,
        "campaignName": movement.campaign_name,
        "amount": movement.amount,
        "stage": movement.stage,
        "sourceEventId": event.event_id,
    });
    if let Some(phone) = phone {
        data["phone"] = json!(phone);
    }
    data
}

/// 奖金事件消费者
pub struct BonusEventConsumer {
    subscriber: RedisSubscriber,
    handler: MessageHandler,
}

impl BonusEventConsumer {
    pub fn new(subscriber: RedisSubscriber, handler: MessageHandler) -> Self {
        Self {
            subscriber,
            handler,
        }
    }

    /// 启动消费循环，直到收到 shutdown 信号
    pub async fn run(mut self, shutdown: watch::Receiver<bool>) -> Result<(), CasinoError> {
        let event_channel = self.handler.channels.event_channel.clone();
        let reload_channel = self.handler.channels.campaign_reload_channel.clone();
        self.subscriber
            .subscribe(&[event_channel.as_str(), reload_channel.as_str()])
            .await?;

        info!(%event_channel, %reload_channel, "奖金事件消费者已启动");

        let handler = self.handler;
        self.subscriber
            .start(shutdown, |msg| {
                let handler = &handler;
                async move {
                    match handler.handle(&msg).await? {
                        HandleOutcome::Processed(result) if !result.errors.is_empty() => {
                            warn!(
                                event_id = %result.event_id,
                                errors = ?result.errors,
                                "事件部分活动处理失败"
                            );
                        }
                        HandleOutcome::DeadLettered(reason) => {
                            warn!(channel = %msg.channel, %reason, "消息已转入死信队列");
                        }
                        _ => {}
                    }
                    Ok(())
                }
            })
            .await?;

        info!("奖金事件消费者已停止");
        Ok(())
    }
}
