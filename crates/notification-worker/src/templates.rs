//! 通知模板
//!
//! 按通知类型生成标题和正文，正文参数取自通知的 `data`（campaignName、amount、stage）。

use casino_shared::events::NotificationType;
use serde_json::Value;

/// 渲染后的通知内容
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedNotification {
    pub title: String,
    pub body: String,
}

pub struct NotificationTemplateEngine;

impl NotificationTemplateEngine {
    pub fn render(notification_type: NotificationType, data: &Value) -> RenderedNotification {
        RenderedNotification {
            title: Self::render_title(notification_type),
            body: Self::render_body(notification_type, data),
        }
    }

    /// 标题固定，客户端按标题聚合同类通知
    pub fn render_title(notification_type: NotificationType) -> String {
        match notification_type {
            NotificationType::BonusCredited => "奖金已到账",
            NotificationType::BonusReleased => "奖金已解锁",
            NotificationType::BonusForfeited => "奖金已失效",
            NotificationType::BonusExpired => "奖金已过期",
            NotificationType::CampaignCompleted => "活动已完成",
        }
        .to_string()
    }

    /// 缺失字段使用占位符
    pub fn render_body(notification_type: NotificationType, data: &Value) -> String {
        let campaign = extract_str(data, "campaignName", "活动");
        let amount = extract_str(data, "amount", "0");

        match notification_type {
            NotificationType::BonusCredited => {
                format!("您参与「{campaign}」获得 {amount} 元奖金")
            }
            NotificationType::BonusReleased => {
                let stage = extract_str(data, "stage", "?");
                format!("「{campaign}」第 {stage} 阶段已解锁 {amount} 元奖金，可用于下注")
            }
            NotificationType::BonusForfeited => {
                format!("您在「{campaign}」中尚未解锁的 {amount} 元奖金因提现已失效")
            }
            NotificationType::BonusExpired => {
                format!("您在「{campaign}」中尚未解锁的 {amount} 元奖金已过期")
            }
            NotificationType::CampaignCompleted => {
                format!("恭喜！「{campaign}」的奖金已全部解锁")
            }
        }
    }
}

/// 字符串原样返回，数值等其他类型按 JSON 文本渲染，null 视为缺失
fn extract_str(data: &Value, key: &str, default: &str) -> String {
    match data.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => default.to_string(),
        Some(other) => other.to_string(),
    }
}
