//! 多渠道通知发送器
//!
//! `NotificationSender` 抽象单个渠道的发送行为：
//! - `FcmPushSender`：FCM HTTP v1 推送，逐个设备令牌发送
//! - `SmsSender`：短信服务商 HTTP 接口
//!
//! 渠道拒绝、用户没有令牌或手机号等情况返回失败的 `SendResult`，只有基础设施故障才返回错误。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use casino_shared::cache::{Cache, CacheKey};
use casino_shared::config::NotificationConfig;
use casino_shared::events::{NotificationChannel, NotificationEvent};
use futures::future::join_all;
use reqwest::Client;
use serde_json::{Map, Value, json};
use tracing::{debug, info, instrument, warn};

use crate::error::NotificationError;
use crate::templates::{NotificationTemplateEngine, RenderedNotification};

/// 单个渠道的发送结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendResult {
    pub success: bool,
    pub channel: NotificationChannel,
    /// 渠道返回的消息标识
    pub message_id: Option<String>,
    pub error: Option<String>,
}

impl SendResult {
    pub fn delivered(channel: NotificationChannel, message_id: Option<String>) -> Self {
        Self {
            success: true,
            channel,
            message_id,
            error: None,
        }
    }

    pub fn failed(channel: NotificationChannel, error: impl Into<String>) -> Self {
        Self {
            success: false,
            channel,
            message_id: None,
            error: Some(error.into()),
        }
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send(&self, notification: &NotificationEvent)
    -> Result<SendResult, NotificationError>;

    fn channel(&self) -> NotificationChannel;
}

// ---------------------------------------------------------------------------
// 设备令牌
// ---------------------------------------------------------------------------

/// 用户设备推送令牌存储
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DeviceTokenStore: Send + Sync {
    async fn tokens(&self, user_id: &str) -> Result<Vec<String>, NotificationError>;

    async fn remove(&self, user_id: &str, token: &str) -> Result<(), NotificationError>;
}

/// 令牌存放在 Redis 集合 `device:tokens:{user_id}`，由客户端登录时写入
pub struct RedisDeviceTokenStore {
    cache: Arc<Cache>,
}

impl RedisDeviceTokenStore {
    pub fn new(cache: Arc<Cache>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl DeviceTokenStore for RedisDeviceTokenStore {
    async fn tokens(&self, user_id: &str) -> Result<Vec<String>, NotificationError> {
        Ok(self.cache.members(&CacheKey::device_tokens(user_id)).await?)
    }

    async fn remove(&self, user_id: &str, token: &str) -> Result<(), NotificationError> {
        self.cache
            .remove_member(&CacheKey::device_tokens(user_id), token)
            .await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// FCM 推送
// ---------------------------------------------------------------------------

enum TokenOutcome {
    Sent(String),
    /// 令牌已注销，需要从存储中移除
    Unregistered,
    Rejected(String),
}

pub struct FcmPushSender {
    client: Client,
    send_url: String,
    access_token: String,
    tokens: Arc<dyn DeviceTokenStore>,
}

impl FcmPushSender {
    pub fn new(
        config: &NotificationConfig,
        tokens: Arc<dyn DeviceTokenStore>,
    ) -> Result<Self, NotificationError> {
        if config.fcm_project_id.is_empty() {
            return Err(NotificationError::Config("fcm_project_id 未配置".to_string()));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()?;

        Ok(Self {
            client,
            send_url: format!(
                "{}/v1/projects/{}/messages:send",
                config.fcm_endpoint.trim_end_matches('/'),
                config.fcm_project_id
            ),
            access_token: config.fcm_access_token.clone(),
            tokens,
        })
    }

    /// FCM 的 data 字段只接受字符串值
    fn string_data(data: &Value) -> Map<String, Value> {
        let Value::Object(map) = data else {
            return Map::new();
        };
        map.iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(k, v)| {
                let s = match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (k.clone(), Value::String(s))
            })
            .collect()
    }

    fn message_body(
        token: &str,
        rendered: &RenderedNotification,
        notification: &NotificationEvent,
    ) -> Value {
        let mut data = Self::string_data(&notification.data);
        data.insert(
            "notificationId".into(),
            Value::String(notification.notification_id.clone()),
        );
        json!({
            "message": {
                "token": token,
                "notification": {
                    "title": rendered.title,
                    "body": rendered.body,
                },
                "data": data,
            }
        })
    }

    fn is_unregistered(body: &Value) -> bool {
        let Some(error) = body.get("error") else {
            return false;
        };
        if error.get("status").and_then(Value::as_str) == Some("UNREGISTERED") {
            return true;
        }
        error
            .get("details")
            .and_then(Value::as_array)
            .is_some_and(|details| {
                details
                    .iter()
                    .any(|d| d.get("errorCode").and_then(Value::as_str) == Some("UNREGISTERED"))
            })
    }

    async fn send_to_token(&self, body: Value) -> Result<TokenOutcome, NotificationError> {
        let response = self
            .client
            .post(&self.send_url)
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let payload: Value = response.json().await.unwrap_or(Value::Null);

        if status.is_success() {
            let name = payload
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            return Ok(TokenOutcome::Sent(name));
        }
        if Self::is_unregistered(&payload) {
            return Ok(TokenOutcome::Unregistered);
        }
        Ok(TokenOutcome::Rejected(format!("HTTP {status}: {payload}")))
    }
}

#[async_trait]
impl NotificationSender for FcmPushSender {
    #[instrument(skip_all, fields(notification_id = %notification.notification_id, user_id = %notification.user_id))]
    async fn send(
        &self,
        notification: &NotificationEvent,
    ) -> Result<SendResult, NotificationError> {
        let tokens = self.tokens.tokens(&notification.user_id).await?;
        if tokens.is_empty() {
            debug!("用户没有已注册的设备");
            return Ok(SendResult::failed(
                NotificationChannel::Push,
                "用户没有已注册的设备令牌",
            ));
        }

        let rendered =
            NotificationTemplateEngine::render(notification.notification_type, &notification.data);

        let outcomes = join_all(tokens.iter().map(|token| {
            self.send_to_token(Self::message_body(token, &rendered, notification))
        }))
        .await;

        let mut message_ids = Vec::new();
        let mut errors = Vec::new();
        for (token, outcome) in tokens.iter().zip(outcomes) {
            match outcome {
                Ok(TokenOutcome::Sent(name)) => message_ids.push(name),
                Ok(TokenOutcome::Unregistered) => {
                    info!("设备令牌已注销，移除");
                    if let Err(e) = self.tokens.remove(&notification.user_id, token).await {
                        warn!(error = %e, "移除失效设备令牌失败");
                    }
                    errors.push("UNREGISTERED".to_string());
                }
                Ok(TokenOutcome::Rejected(reason)) => errors.push(reason),
                Err(e) => errors.push(e.to_string()),
            }
        }

        info!(
            devices = tokens.len(),
            delivered = message_ids.len(),
            "推送发送完成"
        );

        if message_ids.is_empty() {
            return Ok(SendResult::failed(NotificationChannel::Push, errors.join("; ")));
        }
        Ok(SendResult::delivered(
            NotificationChannel::Push,
            message_ids.into_iter().next(),
        ))
    }

    fn channel(&self) -> NotificationChannel {
        NotificationChannel::Push
    }
}

// ---------------------------------------------------------------------------
// 短信
// ---------------------------------------------------------------------------

pub struct SmsSender {
    client: Client,
    endpoint: String,
    api_key: String,
    sender_id: String,
}

impl SmsSender {
    pub fn new(config: &NotificationConfig) -> Result<Self, NotificationError> {
        if config.sms_endpoint.is_empty() {
            return Err(NotificationError::Config("sms_endpoint 未配置".to_string()));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()?;

        Ok(Self {
            client,
            endpoint: config.sms_endpoint.clone(),
            api_key: config.sms_api_key.clone(),
            sender_id: config.sms_sender_id.clone(),
        })
    }
}

#[async_trait]
impl NotificationSender for SmsSender {
    #[instrument(skip_all, fields(notification_id = %notification.notification_id, user_id = %notification.user_id))]
    async fn send(
        &self,
        notification: &NotificationEvent,
    ) -> Result<SendResult, NotificationError> {
        let Some(phone) = notification.data.get("phone").and_then(Value::as_str) else {
            return Ok(SendResult::failed(NotificationChannel::Sms, "通知缺少手机号"));
        };

        let rendered =
            NotificationTemplateEngine::render(notification.notification_type, &notification.data);

        let response = self
            .client
            .post(&self.endpoint)
            .header("X-Api-Key", &self.api_key)
            .json(&json!({
                "to": phone,
                "from": self.sender_id,
                "message": format!("【{}】{}", rendered.title, rendered.body),
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(%status, %body, "短信服务商拒绝请求");
            return Ok(SendResult::failed(
                NotificationChannel::Sms,
                format!("HTTP {status}: {body}"),
            ));
        }

        let message_id = response
            .json::<Value>()
            .await
            .ok()
            .and_then(|v| v.get("messageId").and_then(Value::as_str).map(str::to_string));
        info!(?message_id, "短信已发送");
        Ok(SendResult::delivered(NotificationChannel::Sms, message_id))
    }

    fn channel(&self) -> NotificationChannel {
        NotificationChannel::Sms
    }
}
