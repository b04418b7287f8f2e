//! 用户活动使用记录
//!
//! 每个用户一份 JSON，缓存在 Redis `campaign:usage:{user_id}` 中，
//! 记录各活动的参与次数、锁定奖金和流水进度。

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::bonus_transaction::BonusTransaction;
use super::campaign::Campaign;
use super::enums::{BonusKind, BonusReleaseType, ForfeitReason, UsageStatus};

/// 单个活动的使用进度
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignUsage {
    pub campaign_id: i64,
    pub status: UsageStatus,
    /// 累计参与次数
    pub times_used: i32,
    /// 当前参与轮次，奖金流水幂等键的一部分
    pub usage_seq: i32,
    /// 本轮发放时满足的资格条件
    #[serde(default)]
    pub matched_rules: Vec<String>,
    /// 本轮发放到锁定奖金的总额
    pub locked_amount: Decimal,
    /// 本轮已释放（或直接发放）到可用奖金的金额
    pub released_amount: Decimal,
    #[serde(default)]
    pub released_stages: Vec<i32>,
    /// 发放后的累计下注额
    pub wagered: Decimal,
    #[serde(default)]
    pub credited_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_event_id: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl CampaignUsage {
    /// 尚未参与过的记录，状态不是 ACTIVE
    pub fn new(campaign_id: i64, now: DateTime<Utc>) -> Self {
        Self {
            campaign_id,
            status: UsageStatus::Completed,
            times_used: 0,
            usage_seq: 0,
            matched_rules: vec![],
            locked_amount: Decimal::ZERO,
            released_amount: Decimal::ZERO,
            released_stages: vec![],
            wagered: Decimal::ZERO,
            credited_at: None,
            expires_at: None,
            last_event_id: None,
            updated_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == UsageStatus::Active
    }

    /// 尚未释放的锁定奖金
    pub fn remaining_locked(&self) -> Decimal {
        (self.locked_amount - self.released_amount).max(Decimal::ZERO)
    }

    pub fn is_stage_released(&self, stage: i32) -> bool {
        self.released_stages.contains(&stage)
    }

    /// 有效期已过但仍处于进行中
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.is_active() && self.expires_at.is_some_and(|t| now > t)
    }

    /// 开始新一轮参与
    ///
    /// 锁定奖金进入 ACTIVE 等待释放；直接发放的奖金本轮即完成。
    pub fn start_new_cycle(
        &mut self,
        campaign: &Campaign,
        amount: Decimal,
        matched_rules: Vec<String>,
        event_id: &str,
        now: DateTime<Utc>,
    ) {
        self.times_used += 1;
        self.usage_seq = self.times_used;
        self.matched_rules = matched_rules;
        self.released_stages.clear();
        self.wagered = Decimal::ZERO;
        self.credited_at = Some(now);
        self.expires_at = campaign.bonus_expires_at(now);
        self.last_event_id = Some(event_id.to_string());
        self.updated_at = now;

        match campaign.bonus_kind {
            BonusKind::Locked => {
                self.status = UsageStatus::Active;
                self.locked_amount = amount;
                self.released_amount = Decimal::ZERO;
            }
            BonusKind::Unlocked => {
                self.status = UsageStatus::Completed;
                self.locked_amount = Decimal::ZERO;
                self.released_amount = amount;
            }
        }
    }

    /// 按奖金流水重建第 `usage_seq` 轮进度
    ///
    /// 使用记录丢失或落后于流水时调用。阶段释放与没收以流水为准；
    /// `wagered` 无法从流水恢复，从零开始。
    pub fn restore_cycle(
        &mut self,
        campaign: &Campaign,
        usage_seq: i32,
        history: &[BonusTransaction],
        matched_rules: Vec<String>,
        event_id: &str,
        now: DateTime<Utc>,
    ) {
        let credit = history.iter().find(|t| {
            matches!(t.release_type, BonusReleaseType::Locked | BonusReleaseType::Unlocked)
        });
        let amount = credit.map_or(Decimal::ZERO, |t| t.amount);
        let credited_at = credit.map_or(now, |t| t.created_at);

        self.times_used = self.times_used.max(usage_seq);
        self.usage_seq = usage_seq;
        self.matched_rules = matched_rules;
        self.released_stages.clear();
        self.wagered = Decimal::ZERO;
        self.credited_at = Some(credited_at);
        self.expires_at = campaign.bonus_expires_at(credited_at);
        self.last_event_id = Some(event_id.to_string());
        self.updated_at = now;

        if campaign.bonus_kind == BonusKind::Unlocked {
            self.status = UsageStatus::Completed;
            self.locked_amount = Decimal::ZERO;
            self.released_amount = amount;
            return;
        }

        self.locked_amount = amount;
        self.released_amount = Decimal::ZERO;
        for tx in history.iter().filter(|t| t.release_type == BonusReleaseType::Stage) {
            if !self.released_stages.contains(&tx.stage) {
                self.released_stages.push(tx.stage);
            }
            self.released_amount += tx.amount;
        }
        self.released_stages.sort_unstable();

        let forfeit = history
            .iter()
            .find(|t| t.release_type == BonusReleaseType::Forfeit);
        let fully_released = campaign
            .release_schedule
            .iter()
            .all(|s| self.is_stage_released(s.stage));

        self.status = match forfeit {
            Some(tx) if tx.reason.as_deref() == Some(ForfeitReason::Expired.as_str()) => {
                UsageStatus::Expired
            }
            Some(_) => UsageStatus::Forfeited,
            None if fully_released => UsageStatus::Completed,
            None => UsageStatus::Active,
        };
    }

    /// 记录阶段释放
    pub fn record_release(&mut self, stage: i32, amount: Decimal, event_id: &str, now: DateTime<Utc>) {
        if !self.released_stages.contains(&stage) {
            self.released_stages.push(stage);
            self.released_stages.sort_unstable();
        }
        self.released_amount += amount;
        self.last_event_id = Some(event_id.to_string());
        self.updated_at = now;
    }

    /// 本轮结束（完成、没收或过期）
    pub fn close(&mut self, status: UsageStatus, event_id: &str, now: DateTime<Utc>) {
        self.status = status;
        self.last_event_id = Some(event_id.to_string());
        self.updated_at = now;
    }

    /// 规则引擎 `usage` 数据域
    pub fn to_context_value(&self) -> serde_json::Value {
        serde_json::json!({
            "campaign_id": self.campaign_id,
            "status": self.status,
            "times_used": self.times_used,
            "usage_seq": self.usage_seq,
            "locked_amount": self.locked_amount,
            "released_amount": self.released_amount,
            "remaining_locked": self.remaining_locked(),
            "released_stages": self.released_stages,
            "stages_released": self.released_stages.len(),
            "wagered": self.wagered,
            "credited_at": self.credited_at,
        })
    }
}

/// 用户所有活动的使用记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserCampaignUsage {
    pub user_id: String,
    #[serde(default)]
    pub campaigns: BTreeMap<i64, CampaignUsage>,
    /// 最近一次保存时处理的事件，重放同一事件时据此跳过
    #[serde(default)]
    pub last_event_id: Option<String>,
}

impl UserCampaignUsage {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            campaigns: BTreeMap::new(),
            last_event_id: None,
        }
    }

    pub fn get(&self, campaign_id: i64) -> Option<&CampaignUsage> {
        self.campaigns.get(&campaign_id)
    }

    pub fn get_mut(&mut self, campaign_id: i64) -> Option<&mut CampaignUsage> {
        self.campaigns.get_mut(&campaign_id)
    }

    /// 获取或创建活动记录
    pub fn entry(&mut self, campaign_id: i64, now: DateTime<Utc>) -> &mut CampaignUsage {
        self.campaigns
            .entry(campaign_id)
            .or_insert_with(|| CampaignUsage::new(campaign_id, now))
    }

    /// 处于进行中的活动 ID，升序
    pub fn active_campaign_ids(&self) -> Vec<i64> {
        self.campaigns
            .values()
            .filter(|u| u.is_active())
            .map(|u| u.campaign_id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::campaign::fixtures::{locked_deposit_campaign, unlocked_registration_campaign};
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn ledger_row(
        release_type: BonusReleaseType,
        stage: i32,
        amount: Decimal,
        reason: Option<&str>,
        created_at: DateTime<Utc>,
    ) -> BonusTransaction {
        BonusTransaction {
            id: 0,
            user_id: "u-1".to_string(),
            campaign_id: 7,
            release_type,
            usage_seq: 1,
            stage,
            amount,
            source_event_id: "evt-old".to_string(),
            reason: reason.map(str::to_string),
            created_at,
        }
    }

    #[test]
    fn test_restore_completed_cycle_from_ledger() {
        let credited_at = Utc::now() - Duration::days(3);
        let campaign = locked_deposit_campaign(7);
        let history = vec![
            ledger_row(BonusReleaseType::Locked, 0, dec!(100), None, credited_at),
            ledger_row(BonusReleaseType::Stage, 1, dec!(50), None, credited_at),
            ledger_row(BonusReleaseType::Stage, 2, dec!(50), None, credited_at),
        ];

        let mut usage = CampaignUsage::new(7, Utc::now());
        usage.restore_cycle(&campaign, 1, &history, vec![], "evt-new", Utc::now());

        assert_eq!(usage.status, UsageStatus::Completed);
        assert_eq!(usage.times_used, 1);
        assert_eq!(usage.released_stages, vec![1, 2]);
        assert_eq!(usage.remaining_locked(), Decimal::ZERO);
        assert_eq!(usage.credited_at, Some(credited_at));
        assert_eq!(usage.expires_at, Some(credited_at + Duration::days(30)));
    }

    #[test]
    fn test_restore_forfeited_and_open_cycles() {
        let now = Utc::now();
        let campaign = locked_deposit_campaign(7);
        let credit = ledger_row(BonusReleaseType::Locked, 0, dec!(100), None, now);

        let mut usage = CampaignUsage::new(7, now);
        let forfeited = vec![
            credit.clone(),
            ledger_row(BonusReleaseType::Forfeit, 0, dec!(100), Some("WITHDRAWAL"), now),
        ];
        usage.restore_cycle(&campaign, 1, &forfeited, vec![], "evt", now);
        assert_eq!(usage.status, UsageStatus::Forfeited);

        let expired = vec![
            credit.clone(),
            ledger_row(BonusReleaseType::Forfeit, 0, dec!(100), Some("EXPIRED"), now),
        ];
        usage.restore_cycle(&campaign, 1, &expired, vec![], "evt", now);
        assert_eq!(usage.status, UsageStatus::Expired);

        let open = vec![
            credit,
            ledger_row(BonusReleaseType::Stage, 1, dec!(50), None, now),
        ];
        usage.restore_cycle(&campaign, 1, &open, vec![], "evt", now);
        assert!(usage.is_active());
        assert_eq!(usage.remaining_locked(), dec!(50));
        assert_eq!(usage.times_used, 1);
    }

    #[test]
    fn test_locked_cycle() {
        let now = Utc::now();
        let campaign = locked_deposit_campaign(7);
        let mut usage = CampaignUsage::new(7, now);

        usage.start_new_cycle(&campaign, dec!(100), vec!["event.amount gte 20".into()], "evt-1", now);
        assert!(usage.is_active());
        assert_eq!(usage.times_used, 1);
        assert_eq!(usage.usage_seq, 1);
        assert_eq!(usage.remaining_locked(), dec!(100));
        assert_eq!(usage.expires_at, Some(now + Duration::days(30)));

        usage.record_release(1, dec!(50), "evt-2", now);
        assert!(usage.is_stage_released(1));
        assert_eq!(usage.remaining_locked(), dec!(50));
    }

    #[test]
    fn test_unlocked_cycle_completes_immediately() {
        let now = Utc::now();
        let campaign = unlocked_registration_campaign(3);
        let mut usage = CampaignUsage::new(3, now);

        usage.start_new_cycle(&campaign, dec!(10), vec![], "evt-1", now);
        assert_eq!(usage.status, UsageStatus::Completed);
        assert_eq!(usage.remaining_locked(), Decimal::ZERO);
        assert_eq!(usage.released_amount, dec!(10));
        assert_eq!(usage.expires_at, None);
    }

    #[test]
    fn test_new_cycle_resets_progress() {
        let now = Utc::now();
        let campaign = locked_deposit_campaign(7);
        let mut usage = CampaignUsage::new(7, now);
        usage.start_new_cycle(&campaign, dec!(100), vec![], "evt-1", now);
        usage.wagered = dec!(900);
        usage.record_release(1, dec!(50), "evt-2", now);
        usage.close(UsageStatus::Forfeited, "evt-3", now);

        usage.start_new_cycle(&campaign, dec!(40), vec![], "evt-4", now);
        assert_eq!(usage.usage_seq, 2);
        assert_eq!(usage.wagered, Decimal::ZERO);
        assert!(usage.released_stages.is_empty());
        assert_eq!(usage.remaining_locked(), dec!(40));
    }

    #[test]
    fn test_is_expired() {
        let now = Utc::now();
        let mut usage = CampaignUsage::new(1, now);
        usage.status = UsageStatus::Active;
        usage.expires_at = Some(now - Duration::seconds(1));
        assert!(usage.is_expired(now));

        usage.status = UsageStatus::Completed;
        assert!(!usage.is_expired(now));
    }

    #[test]
    fn test_context_value() {
        let now = Utc::now();
        let mut usage = CampaignUsage::new(1, now);
        usage.wagered = dec!(250.50);
        usage.locked_amount = dec!(100);
        let value = usage.to_context_value();
        assert_eq!(value["wagered"], "250.50");
        assert_eq!(value["remaining_locked"], "100");
        assert_eq!(value["stages_released"], 0);
    }

    #[test]
    fn test_user_usage_roundtrip_with_integer_keys() {
        let now = Utc::now();
        let mut user_usage = UserCampaignUsage::new("u-1");
        user_usage.entry(42, now).status = UsageStatus::Active;
        user_usage.entry(7, now);

        let json = serde_json::to_string(&user_usage).unwrap();
        let back: UserCampaignUsage = serde_json::from_str(&json).unwrap();
        assert_eq!(back, user_usage);
        assert_eq!(back.active_campaign_ids(), vec![42]);
    }
}
