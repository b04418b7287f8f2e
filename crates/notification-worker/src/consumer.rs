//! 通知消费者
//!
//! 订阅通知通道，按通知指定的渠道并行发送。单个渠道失败不影响其他渠道，
//! 全部渠道失败或消息无法解析时写入死信列表。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use casino_shared::error::CasinoError;
use casino_shared::events::{NotificationChannel, NotificationEvent};
use casino_shared::observability::metrics;
use casino_shared::pubsub::{ChannelMessage, RedisPublisher, RedisSubscriber};
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::error::NotificationError;
use crate::sender::{NotificationSender, SendResult};

pub type SenderMap = HashMap<NotificationChannel, Arc<dyn NotificationSender>>;

/// 死信写入
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    async fn push(&self, message: &ChannelMessage, error: &str) -> Result<(), CasinoError>;
}

#[async_trait]
impl DeadLetterSink for RedisPublisher {
    async fn push(&self, message: &ChannelMessage, error: &str) -> Result<(), CasinoError> {
        self.push_dead_letter(message, error).await
    }
}

/// 单条消息的处理结果
#[derive(Debug)]
pub enum Delivery {
    /// 至少一个渠道发送成功
    Delivered(Vec<SendResult>),
    DeadLettered(String),
}

pub struct NotificationConsumer {
    subscriber: RedisSubscriber,
    channel: String,
    senders: SenderMap,
    dead_letters: Arc<dyn DeadLetterSink>,
}

impl NotificationConsumer {
    pub fn new(
        subscriber: RedisSubscriber,
        channel: impl Into<String>,
        senders: SenderMap,
        dead_letters: Arc<dyn DeadLetterSink>,
    ) -> Self {
        Self {
            subscriber,
            channel: channel.into(),
            senders,
            dead_letters,
        }
    }

    /// 启动消费循环，直到收到 shutdown 信号
    pub async fn run(mut self, shutdown: watch::Receiver<bool>) -> Result<(), NotificationError> {
        self.subscriber.subscribe(&[self.channel.as_str()]).await?;
        info!(channel = %self.channel, senders = self.senders.len(), "通知消费者已启动");

        let senders = self.senders;
        let dead_letters = self.dead_letters;
        self.subscriber
            .start(shutdown, |msg| {
                let senders = &senders;
                let dead_letters = dead_letters.as_ref();
                async move {
                    if let Delivery::DeadLettered(reason) =
                        handle_message(senders, dead_letters, &msg).await?
                    {
                        warn!(channel = %msg.channel, %reason, "通知已转入死信队列");
                    }
                    Ok(())
                }
            })
            .await?;

        info!("通知消费者已停止");
        Ok(())
    }
}

/// 处理单条通知消息
///
/// 只有写入死信失败时返回错误
pub async fn handle_message(
    senders: &SenderMap,
    dead_letters: &dyn DeadLetterSink,
    msg: &ChannelMessage,
) -> Result<Delivery, CasinoError> {
    let notification: NotificationEvent = match serde_json::from_slice(&msg.payload) {
        Ok(n) => n,
        Err(e) => {
            let reason = NotificationError::DeserializationFailed(e.to_string()).to_string();
            warn!(channel = %msg.channel, %reason, "通知反序列化失败");
            dead_letters.push(msg, &reason).await?;
            return Ok(Delivery::DeadLettered(reason));
        }
    };

    info!(
        notification_id = %notification.notification_id,
        user_id = %notification.user_id,
        notification_type = ?notification.notification_type,
        channels = ?notification.channels,
        "收到通知事件"
    );

    let results = handle_notification(senders, &notification).await;
    for result in results.iter().filter(|r| !r.success) {
        warn!(
            notification_id = %notification.notification_id,
            channel = ?result.channel,
            error = ?result.error,
            "渠道发送失败"
        );
    }

    let success_count = results.iter().filter(|r| r.success).count();
    info!(
        notification_id = %notification.notification_id,
        total_channels = results.len(),
        success_count,
        "通知事件处理完成"
    );

    if success_count == 0 {
        let reason = results
            .iter()
            .map(|r| format!("{:?}: {}", r.channel, r.error.as_deref().unwrap_or("未知错误")))
            .collect::<Vec<_>>()
            .join("; ");
        let reason = if reason.is_empty() {
            "通知未指定渠道".to_string()
        } else {
            reason
        };
        dead_letters.push(msg, &reason).await?;
        return Ok(Delivery::DeadLettered(reason));
    }

    Ok(Delivery::Delivered(results))
}

/// 按通知指定的渠道并行发送
pub async fn handle_notification(
    senders: &SenderMap,
    notification: &NotificationEvent,
) -> Vec<SendResult> {
    let futures = notification.channels.iter().map(|&channel| async move {
        let result = match senders.get(&channel) {
            Some(sender) => match sender.send(notification).await {
                Ok(result) => result,
                Err(e) => {
                    error!(channel = ?channel, error = %e, retryable = e.is_retryable(), "发送器执行异常");
                    SendResult::failed(channel, e.to_string())
                }
            },
            None => {
                warn!(channel = ?channel, "未找到该渠道的发送器，跳过");
                SendResult::failed(channel, "发送器未注册")
            }
        };
        metrics::record_notification_sent(channel_label(channel), result.success);
        result
    });

    futures::future::join_all(futures).await
}

fn channel_label(channel: NotificationChannel) -> &'static str {
    match channel {
        NotificationChannel::Push => "PUSH",
        NotificationChannel::Sms => "SMS",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sender::MockNotificationSender;
    use casino_shared::events::NotificationType;
    use casino_shared::pubsub::channels;
    use serde_json::json;

    fn notification(channels: Vec<NotificationChannel>) -> NotificationEvent {
        NotificationEvent::new(
            "user-001",
            NotificationType::BonusForfeited,
            json!({"campaignName": "首充奖励", "amount": "80", "phone": "+8613800000000"}),
            channels,
        )
    }

    fn message(notification: &NotificationEvent) -> ChannelMessage {
        ChannelMessage::new(channels::NOTIFICATIONS, serde_json::to_vec(notification).unwrap())
    }

    fn sender(channel: NotificationChannel, success: bool) -> Arc<dyn NotificationSender> {
        let mut mock = MockNotificationSender::new();
        mock.expect_send().times(1).returning(move |_| {
            Ok(if success {
                SendResult::delivered(channel, Some("msg-1".into()))
            } else {
                SendResult::failed(channel, "渠道拒绝")
            })
        });
        mock.expect_channel().return_const(channel);
        Arc::new(mock)
    }

    #[tokio::test]
    async fn test_parallel_send_all_channels() {
        let mut senders: SenderMap = HashMap::new();
        senders.insert(NotificationChannel::Push, sender(NotificationChannel::Push, true));
        senders.insert(NotificationChannel::Sms, sender(NotificationChannel::Sms, true));

        let notification = notification(vec![NotificationChannel::Push, NotificationChannel::Sms]);
        let results = handle_notification(&senders, &notification).await;

        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.success));
        assert_eq!(results[0].channel, NotificationChannel::Push);
        assert_eq!(results[1].channel, NotificationChannel::Sms);
    }

    #[tokio::test]
    async fn test_missing_sender_fails_only_that_channel() {
        let mut senders: SenderMap = HashMap::new();
        senders.insert(NotificationChannel::Push, sender(NotificationChannel::Push, true));

        let notification = notification(vec![NotificationChannel::Push, NotificationChannel::Sms]);
        let mut dlq = MockDeadLetterSink::new();
        dlq.expect_push().never();

        let delivery = handle_message(&senders, &dlq, &message(&notification))
            .await
            .unwrap();
        let Delivery::Delivered(results) = delivery else {
            panic!("应为部分成功");
        };
        let sms = results
            .iter()
            .find(|r| r.channel == NotificationChannel::Sms)
            .unwrap();
        assert!(!sms.success);
        assert_eq!(sms.error.as_deref(), Some("发送器未注册"));
    }

    #[tokio::test]
    async fn test_all_channels_failed_goes_to_dead_letter() {
        let mut senders: SenderMap = HashMap::new();
        senders.insert(NotificationChannel::Push, sender(NotificationChannel::Push, false));

        let mut dlq = MockDeadLetterSink::new();
        dlq.expect_push()
            .withf(|msg, reason| msg.channel == channels::NOTIFICATIONS && reason.contains("渠道拒绝"))
            .times(1)
            .returning(|_, _| Ok(()));

        let notification = notification(vec![NotificationChannel::Push]);
        let delivery = handle_message(&senders, &dlq, &message(&notification))
            .await
            .unwrap();
        assert!(matches!(delivery, Delivery::DeadLettered(_)));
    }

    #[tokio::test]
    async fn test_sender_error_counts_as_failure() {
        let mut mock = MockNotificationSender::new();
        mock.expect_send().returning(|_| {
            Err(NotificationError::SendFailed {
                channel: "PUSH".into(),
                reason: "连接重置".into(),
            })
        });
        let mut senders: SenderMap = HashMap::new();
        senders.insert(NotificationChannel::Push, Arc::new(mock));

        let results =
            handle_notification(&senders, &notification(vec![NotificationChannel::Push])).await;
        assert!(!results[0].success);
        assert!(results[0].error.as_deref().unwrap().contains("连接重置"));
    }

    #[tokio::test]
    async fn test_invalid_payload_dead_lettered() {
        let mut dlq = MockDeadLetterSink::new();
        dlq.expect_push().times(1).returning(|_, _| Ok(()));

        let msg = ChannelMessage::new(channels::NOTIFICATIONS, b"not valid json".to_vec());
        let delivery = handle_message(&HashMap::new(), &dlq, &msg).await.unwrap();
        assert!(matches!(delivery, Delivery::DeadLettered(_)));
    }

    #[tokio::test]
    async fn test_dead_letter_failure_propagates() {
        let mut dlq = MockDeadLetterSink::new();
        dlq.expect_push()
            .returning(|_, _| Err(CasinoError::PubSub("连接断开".into())));

        let msg = ChannelMessage::new(channels::NOTIFICATIONS, b"{}".to_vec());
        let err = handle_message(&HashMap::new(), &dlq, &msg).await.unwrap_err();
        assert!(err.is_retryable());
    }
}
