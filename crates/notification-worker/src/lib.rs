//! 通知工作者服务
//!
//! 订阅奖金引擎发布的通知事件，渲染模板后通过 FCM 推送和短信并行投递。
//! 各渠道独立发送，单个渠道失败不影响其他渠道。

pub mod consumer;
pub mod error;
pub mod sender;
pub mod templates;

pub use consumer::{DeadLetterSink, Delivery, NotificationConsumer, SenderMap, handle_message};
pub use error::NotificationError;
pub use sender::{FcmPushSender, NotificationSender, RedisDeviceTokenStore, SendResult, SmsSender};
