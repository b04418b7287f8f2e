//! Redis pub/sub 消息封装
//!
//! 领域事件、通知与活动重载信号都通过 Redis pub/sub 分发。pub/sub 不保留消息，
//! 处理失败的消息写入 Redis 列表形式的死信队列，供人工排查与重放。

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use futures::stream::BoxStream;
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::cache::CacheKey;
use crate::config::RedisConfig;
use crate::error::CasinoError;
use crate::retry::{RetryPolicy, retry_with_policy};

/// 通道名称常量
pub mod channels {
    pub const DOMAIN_EVENTS: &str = "casino.events";
    pub const NOTIFICATIONS: &str = "casino.notifications";
    pub const CAMPAIGN_RELOAD: &str = "casino.campaign.reload";
}

// ---------------------------------------------------------------------------
// ChannelMessage
// ---------------------------------------------------------------------------

/// 订阅到的消息
#[derive(Debug, Clone)]
pub struct ChannelMessage {
    pub channel: String,
    pub payload: Vec<u8>,
    pub received_at: DateTime<Utc>,
}

impl ChannelMessage {
    pub fn new(channel: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            channel: channel.into(),
            payload: payload.into(),
            received_at: Utc::now(),
        }
    }

    fn from_redis(msg: &redis::Msg) -> Self {
        Self::new(msg.get_channel_name(), msg.get_payload_bytes())
    }

    pub fn payload_str(&self) -> Result<&str, CasinoError> {
        std::str::from_utf8(&self.payload)
            .map_err(|e| CasinoError::PubSub(format!("负载非 UTF-8 编码: {e}")))
    }

    pub fn deserialize_payload<T: DeserializeOwned>(&self) -> Result<T, CasinoError> {
        serde_json::from_slice(&self.payload).map_err(CasinoError::from)
    }
}

/// 死信记录
#[derive(Debug, Clone, Serialize, serde::Deserialize)]
pub struct DeadLetter {
    pub channel: String,
    pub payload: String,
    pub error: String,
    pub failed_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// RedisPublisher
// ---------------------------------------------------------------------------

/// 发布者
///
/// 复用 multiplexed 连接，Clone 代价很低
#[derive(Clone)]
pub struct RedisPublisher {
    client: redis::Client,
}

impl RedisPublisher {
    pub fn new(config: &RedisConfig) -> Result<Self, CasinoError> {
        let client = redis::Client::open(config.url.as_str())?;
        info!("Redis 发布者已初始化");
        Ok(Self { client })
    }

    async fn get_conn(&self) -> Result<MultiplexedConnection, CasinoError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| CasinoError::PubSub(format!("获取发布连接失败: {e}")))
    }

    /// 发布原始负载，返回收到消息的订阅者数量
    pub async fn publish(&self, channel: &str, payload: &[u8]) -> Result<i64, CasinoError> {
        let mut conn = self.get_conn().await?;
        let receivers: i64 = conn
            .publish(channel, payload)
            .await
            .map_err(|e| CasinoError::PubSub(format!("发布消息失败: {e}")))?;

        if receivers == 0 {
            warn!(channel, "消息已发布但当前没有订阅者");
        } else {
            debug!(channel, receivers, "消息已发布");
        }
        Ok(receivers)
    }

    pub async fn publish_json<T: Serialize>(
        &self,
        channel: &str,
        value: &T,
    ) -> Result<i64, CasinoError> {
        let payload = serde_json::to_vec(value)?;
        self.publish(channel, &payload).await
    }

    /// 写入死信列表 `casino:dlq:{channel}`
    pub async fn push_dead_letter(
        &self,
        message: &ChannelMessage,
        error: &str,
    ) -> Result<(), CasinoError> {
        let letter = DeadLetter {
            channel: message.channel.clone(),
            payload: String::from_utf8_lossy(&message.payload).into_owned(),
            error: error.to_string(),
            failed_at: Utc::now(),
        };
        let serialized = serde_json::to_string(&letter)?;

        let mut conn = self.get_conn().await?;
        let _: i64 = conn
            .lpush(CacheKey::dead_letter(&message.channel), serialized)
            .await?;

        warn!(channel = %message.channel, error, "消息已写入死信队列");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// RedisSubscriber
// ---------------------------------------------------------------------------

/// 订阅消息流
pub type MessageStream = BoxStream<'static, ChannelMessage>;

/// 订阅者
///
/// 每个订阅者持有独立的 pub/sub 连接，连接断开后按重连策略重新订阅全部通道
pub struct RedisSubscriber {
    client: redis::Client,
    pubsub: redis::aio::PubSub,
    channels: Vec<String>,
    reconnect_policy: RetryPolicy,
}

impl RedisSubscriber {
    pub async fn connect(config: &RedisConfig) -> Result<Self, CasinoError> {
        let client = redis::Client::open(config.url.as_str())?;
        let pubsub = client
            .get_async_pubsub()
            .await
            .map_err(|e| CasinoError::PubSub(format!("建立订阅连接失败: {e}")))?;
        Ok(Self {
            client,
            pubsub,
            channels: Vec::new(),
            reconnect_policy: default_reconnect_policy(),
        })
    }

    pub fn with_reconnect_policy(mut self, policy: RetryPolicy) -> Self {
        self.reconnect_policy = policy;
        self
    }

    pub async fn subscribe(&mut self, channels: &[&str]) -> Result<(), CasinoError> {
        for channel in channels {
            self.pubsub
                .subscribe(*channel)
                .await
                .map_err(|e| CasinoError::PubSub(format!("订阅通道失败: {e}")))?;
            self.channels.push(channel.to_string());
        }
        info!(?channels, "已订阅 Redis 通道");
        Ok(())
    }

    /// 启动消费循环
    ///
    /// handler 返回错误只记录日志，不中断循环；关闭信号变为 `true` 时返回 `Ok`。
    /// 订阅流中断后重连并重新订阅，重连耗尽重试次数时返回错误。
    pub async fn start<F, Fut>(
        self,
        shutdown: watch::Receiver<bool>,
        handler: F,
    ) -> Result<(), CasinoError>
    where
        F: Fn(ChannelMessage) -> Fut,
        Fut: Future<Output = Result<(), CasinoError>>,
    {
        let Self {
            client,
            pubsub,
            channels,
            reconnect_policy,
        } = self;

        let stream = pubsub
            .into_on_message()
            .map(|raw| ChannelMessage::from_redis(&raw))
            .boxed();
        let reconnect = move || {
            let client = client.clone();
            let channels = channels.clone();
            async move { open_stream(&client, &channels).await }
        };

        consume(stream, reconnect, &reconnect_policy, shutdown, handler).await
    }
}

fn default_reconnect_policy() -> RetryPolicy {
    RetryPolicy {
        max_retries: 10,
        initial_delay: Duration::from_millis(500),
        max_delay: Duration::from_secs(30),
        multiplier: 2.0,
    }
}

async fn open_stream(client: &redis::Client, channels: &[String]) -> Result<MessageStream, CasinoError> {
    let mut pubsub = client
        .get_async_pubsub()
        .await
        .map_err(|e| CasinoError::PubSub(format!("建立订阅连接失败: {e}")))?;
    for channel in channels {
        pubsub
            .subscribe(channel.as_str())
            .await
            .map_err(|e| CasinoError::PubSub(format!("订阅通道失败: {e}")))?;
    }
    Ok(pubsub
        .into_on_message()
        .map(|raw| ChannelMessage::from_redis(&raw))
        .boxed())
}

/// 等待关闭信号，发送端被丢弃也视为关闭
async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    while !*shutdown.borrow() {
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

/// 消费循环，流结束时调用 `reconnect` 换一条新流
pub(crate) async fn consume<R, RFut, F, Fut>(
    mut stream: MessageStream,
    mut reconnect: R,
    policy: &RetryPolicy,
    mut shutdown: watch::Receiver<bool>,
    handler: F,
) -> Result<(), CasinoError>
where
    R: FnMut() -> RFut,
    RFut: Future<Output = Result<MessageStream, CasinoError>>,
    F: Fn(ChannelMessage) -> Fut,
    Fut: Future<Output = Result<(), CasinoError>>,
{
    info!("Redis 订阅循环已启动");

    loop {
        tokio::select! {
            biased;

            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!("收到关闭信号，订阅循环退出");
                    return Ok(());
                }
            }

            next = stream.next() => {
                let Some(msg) = next else {
                    warn!("Redis 订阅流中断，开始重连");
                    tokio::select! {
                        biased;

                        _ = wait_for_shutdown(&mut shutdown) => {
                            info!("重连期间收到关闭信号，订阅循环退出");
                            return Ok(());
                        }

                        reconnected = retry_with_policy(
                            policy,
                            "redis_resubscribe",
                            CasinoError::is_retryable,
                            &mut reconnect,
                        ) => {
                            stream = reconnected.inspect_err(|e| {
                                error!(error = %e, "Redis 重连失败，订阅循环终止");
                            })?;
                            info!("Redis 订阅已恢复");
                            continue;
                        }
                    }
                };

                debug!(channel = %msg.channel, bytes = msg.payload.len(), "收到订阅消息");

                if let Err(e) = handler(msg).await {
                    error!(error = %e, "处理订阅消息失败");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_constants() {
        assert_eq!(channels::DOMAIN_EVENTS, "casino.events");
        assert_eq!(channels::NOTIFICATIONS, "casino.notifications");
        assert_eq!(channels::CAMPAIGN_RELOAD, "casino.campaign.reload");
    }

    #[test]
    fn test_channel_message_deserialize() {
        #[derive(Debug, serde::Deserialize, PartialEq)]
        struct Ping {
            user_id: String,
        }

        let msg = ChannelMessage::new("casino.events", br#"{"user_id":"u-1"}"#.to_vec());
        let ping: Ping = msg.deserialize_payload().unwrap();
        assert_eq!(ping.user_id, "u-1");
        assert_eq!(msg.payload_str().unwrap(), r#"{"user_id":"u-1"}"#);
    }

    #[test]
    fn test_channel_message_invalid_payload() {
        let msg = ChannelMessage::new("casino.events", vec![0xFF, 0xFE]);
        assert!(msg.payload_str().is_err());
        let parsed: Result<serde_json::Value, _> = msg.deserialize_payload();
        assert!(matches!(parsed, Err(CasinoError::Serialization(_))));
    }

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            multiplier: 2.0,
        }
    }

    #[tokio::test]
    async fn test_consume_resubscribes_after_stream_ends() {
        use std::sync::Arc;
        use std::sync::atomic::{AtomicU32, Ordering};

        let first: MessageStream = futures::stream::iter(vec![ChannelMessage::new("casino.events", b"1".to_vec())]).boxed();
        let attempts = Arc::new(AtomicU32::new(0));
        let reconnect = {
            let attempts = attempts.clone();
            move || {
                let attempt = attempts.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt == 0 {
                        return Err(CasinoError::PubSub("连接被拒绝".into()));
                    }
                    let resumed = futures::stream::iter(vec![ChannelMessage::new(
                        "casino.events",
                        b"2".to_vec(),
                    )])
                    .chain(futures::stream::pending());
                    Ok(resumed.boxed())
                }
            }
        };

        let (received_tx, mut received_rx) = tokio::sync::mpsc::unbounded_channel::<Vec<u8>>();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(async move {
            let policy = fast_policy(3);
            consume(first, reconnect, &policy, shutdown_rx, |msg| {
                let tx = received_tx.clone();
                async move {
                    let _ = tx.send(msg.payload);
                    Ok(())
                }
            })
            .await
        });

        for expected in [b"1".to_vec(), b"2".to_vec()] {
            let payload = tokio::time::timeout(Duration::from_secs(5), received_rx.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(payload, expected);
        }
        assert_eq!(attempts.load(Ordering::SeqCst), 2);

        shutdown_tx.send(true).unwrap();
        assert!(handle.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_consume_fails_when_reconnect_exhausted() {
        let empty: MessageStream = futures::stream::empty().boxed();
        let reconnect = || async { Err::<MessageStream, _>(CasinoError::PubSub("连接被拒绝".into())) };
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        let result = consume(empty, reconnect, &fast_policy(1), shutdown_rx, |_| async { Ok(()) }).await;
        assert!(matches!(result, Err(CasinoError::PubSub(_))));
    }

    #[tokio::test]
    async fn test_consume_stops_on_shutdown() {
        let pending: MessageStream = futures::stream::pending().boxed();
        let reconnect = || async { Err::<MessageStream, _>(CasinoError::PubSub("不应重连".into())) };
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        shutdown_tx.send(true).unwrap();

        let result = consume(pending, reconnect, &fast_policy(0), shutdown_rx, |_| async { Ok(()) }).await;
        assert!(result.is_ok());
    }

    #[test]
    fn test_publisher_new_does_not_connect() {
        let publisher = RedisPublisher::new(&RedisConfig {
            url: "redis://127.0.0.1:1".to_string(),
            pool_size: 1,
        });
        assert!(publisher.is_ok());
    }
}
