//! 领域事件与处理管道抽象
//!
//! 定义钱包、账户、游戏事件的统一信封格式，奖金引擎的处理结果，
//! 以及发往通知服务的通知事件。`EventProcessor` trait 是事件处理管道的核心抽象。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CasinoError;

// ---------------------------------------------------------------------------
// EventType: 事件类型枚举
// ---------------------------------------------------------------------------

/// 事件类型枚举
///
/// 分为账户、资金流转、游戏三类。活动的触发事件与分阶段释放条件都以此为准。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    // 账户类
    Registration,
    Login,

    // 资金流转类
    Deposit,
    Withdrawal,

    // 游戏类
    Bet,
    Win,
    Refund,
}

impl EventType {
    pub const ALL: [EventType; 7] = [
        Self::Registration,
        Self::Login,
        Self::Deposit,
        Self::Withdrawal,
        Self::Bet,
        Self::Win,
        Self::Refund,
    ];

    /// 充值与提现，直接改变可用余额
    pub fn is_wallet_movement(&self) -> bool {
        matches!(self, Self::Deposit | Self::Withdrawal)
    }

    /// 下注、派彩与退款
    pub fn is_gameplay(&self) -> bool {
        matches!(self, Self::Bet | Self::Win | Self::Refund)
    }

    pub fn is_account(&self) -> bool {
        matches!(self, Self::Registration | Self::Login)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Registration => "REGISTRATION",
            Self::Login => "LOGIN",
            Self::Deposit => "DEPOSIT",
            Self::Withdrawal => "WITHDRAWAL",
            Self::Bet => "BET",
            Self::Win => "WIN",
            Self::Refund => "REFUND",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for EventType {
    type Err = CasinoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| CasinoError::InvalidArgument {
                field: "event_type".to_string(),
                message: format!("未知的事件类型: {s}"),
            })
    }
}

// ---------------------------------------------------------------------------
// EventPayload: 通用事件信封
// ---------------------------------------------------------------------------

/// 通用事件信封
///
/// `event_id` 用于幂等校验，`data` 以 JSON 承载各事件类型的业务字段
/// （如 `amount`、`reference`、`game_id`），`data.user` 可携带玩家资料快照。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventPayload {
    /// 事件唯一标识（UUID v7）
    pub event_id: String,
    pub event_type: EventType,
    pub user_id: String,
    pub timestamp: DateTime<Utc>,
    pub data: serde_json::Value,
    /// 事件来源系统
    pub source: String,
    pub trace_id: Option<String>,
}

impl EventPayload {
    /// 构建新事件，自动生成 UUID v7 作为 event_id 并记录当前时间
    pub fn new(
        event_type: EventType,
        user_id: impl Into<String>,
        data: serde_json::Value,
        source: impl Into<String>,
    ) -> Self {
        Self {
            event_id: Uuid::now_v7().to_string(),
            event_type,
            user_id: user_id.into(),
            timestamp: Utc::now(),
            data,
            source: source.into(),
            trace_id: None,
        }
    }

    pub fn with_trace_id(mut self, trace_id: Option<String>) -> Self {
        self.trace_id = trace_id;
        self
    }

    /// 读取 data 中的金额字段，规则同 [`parse_amount`]
    pub fn decimal_field(&self, field: &str) -> Option<Decimal> {
        self.data.get(field).and_then(parse_amount)
    }

    pub fn str_field(&self, field: &str) -> Option<&str> {
        self.data.get(field).and_then(|v| v.as_str())
    }

    /// 转换为规则引擎的分域评估上下文
    ///
    /// - `event`：data 中除 `user` 以外的全部顶层字段，再写入信封字段；同名时以信封为准
    /// - `user`：data.user（玩家资料快照），`id` 始终为事件的 user_id
    pub fn to_evaluation_context(&self) -> serde_json::Value {
        let mut event = serde_json::Map::new();
        let mut user = serde_json::Map::new();

        if let serde_json::Value::Object(data_map) = &self.data {
            for (key, value) in data_map {
                if key == "user" {
                    if let serde_json::Value::Object(profile) = value {
                        user.extend(profile.clone());
                    }
                } else {
                    event.insert(key.clone(), value.clone());
                }
            }
        }

        event.insert("event_id".into(), self.event_id.clone().into());
        event.insert("event_type".into(), self.event_type.as_str().into());
        event.insert("timestamp".into(), self.timestamp.to_rfc3339().into());
        event.insert("source".into(), self.source.clone().into());
        user.insert("id".into(), self.user_id.clone().into());

        serde_json::json!({
            "event": event,
            "user": user,
        })
    }
}

/// 金额上限，与账务表 `NUMERIC(18,2)` 一致
pub const MAX_AMOUNT: Decimal = Decimal::from_parts(0xA763_FFFF, 0x0DE0_B6B3, 0, false, 2);

/// 解析金额，数字与数字字符串都接受
///
/// 超过两位小数或绝对值超过 [`MAX_AMOUNT`] 的值视为无效
pub fn parse_amount(value: &serde_json::Value) -> Option<Decimal> {
    let amount: Decimal = match value {
        serde_json::Value::Number(n) => n.to_string().parse().ok()?,
        serde_json::Value::String(s) => s.trim().parse().ok()?,
        _ => return None,
    };
    (amount.normalize().scale() <= 2 && amount.abs() <= MAX_AMOUNT).then_some(amount)
}

// ---------------------------------------------------------------------------
// EventResult: 事件处理结果
// ---------------------------------------------------------------------------

/// 事件处理结果
///
/// 一个事件可能同时推进多个活动，单个活动失败只记录到 `errors`，不影响其他活动。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventResult {
    pub event_id: String,
    pub processed: bool,
    pub matched_campaigns: Vec<MatchedCampaign>,
    pub bonus_movements: Vec<BonusMovement>,
    pub processing_time_ms: i64,
    pub errors: Vec<String>,
}

impl EventResult {
    pub fn new(event_id: impl Into<String>) -> Self {
        Self {
            event_id: event_id.into(),
            ..Default::default()
        }
    }
}

/// 本次事件满足资格条件的活动
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchedCampaign {
    pub campaign_id: i64,
    pub campaign_name: String,
    pub matched_rules: Vec<String>,
}

/// 奖金资金变动类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MovementKind {
    /// 发放到锁定奖金
    LockedCredit,
    /// 直接发放到可用奖金
    UnlockedCredit,
    /// 分阶段释放：锁定转可用
    StageRelease,
    /// 提现等原因没收剩余锁定奖金
    Forfeit,
    /// 有效期到期清除剩余锁定奖金
    Expire,
}

/// 已落账的奖金资金变动
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BonusMovement {
    pub campaign_id: i64,
    pub campaign_name: String,
    pub kind: MovementKind,
    pub stage: Option<i32>,
    pub amount: Decimal,
    /// 该变动使活动全部阶段释放完毕
    pub campaign_completed: bool,
}

// ---------------------------------------------------------------------------
// NotificationEvent: 通知事件
// ---------------------------------------------------------------------------

/// 通知事件
///
/// 奖金引擎落账完成后发布到通知通道，由通知服务渲染模板并推送。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationEvent {
    pub notification_id: String,
    pub user_id: String,
    pub notification_type: NotificationType,
    /// 模板参数，如 campaignName、amount、stage
    pub data: serde_json::Value,
    pub channels: Vec<NotificationChannel>,
    pub created_at: DateTime<Utc>,
}

impl NotificationEvent {
    pub fn new(
        user_id: impl Into<String>,
        notification_type: NotificationType,
        data: serde_json::Value,
        channels: Vec<NotificationChannel>,
    ) -> Self {
        Self {
            notification_id: Uuid::now_v7().to_string(),
            user_id: user_id.into(),
            notification_type,
            data,
            channels,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationType {
    BonusCredited,
    BonusReleased,
    BonusForfeited,
    BonusExpired,
    CampaignCompleted,
}

impl From<MovementKind> for NotificationType {
    fn from(kind: MovementKind) -> Self {
        match kind {
            MovementKind::LockedCredit | MovementKind::UnlockedCredit => Self::BonusCredited,
            MovementKind::StageRelease => Self::BonusReleased,
            MovementKind::Forfeit => Self::BonusForfeited,
            MovementKind::Expire => Self::BonusExpired,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationChannel {
    Push,
    Sms,
}

// ---------------------------------------------------------------------------
// EventProcessor trait: 事件处理管道抽象
// ---------------------------------------------------------------------------

/// 事件处理管道的核心抽象
///
/// `is_processed` / `mark_processed` 配合实现幂等，pub/sub 重放或上游重发不会重复发放奖金。
#[async_trait]
pub trait EventProcessor: Send + Sync {
    async fn process(&self, event: &EventPayload) -> Result<EventResult, CasinoError>;

    fn supported_event_types(&self) -> Vec<EventType>;

    async fn is_processed(&self, event_id: &str) -> Result<bool, CasinoError>;

    async fn mark_processed(&self, event_id: &str) -> Result<(), CasinoError>;
}
