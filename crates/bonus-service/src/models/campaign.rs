//! 奖金活动定义
//!
//! 活动由运营侧配置，引擎只读。资格条件与释放条件都以 `RuleSet` 表达。

use std::collections::HashSet;

use casino_shared::events::EventType;
use chrono::{DateTime, Duration, Utc};
use rule_engine::RuleSet;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::types::Json;

use super::enums::{AmountType, BonusKind, CampaignStatus};
use crate::error::{BonusError, Result};

fn default_base_field() -> String {
    "amount".to_string()
}

fn default_stage_trigger() -> EventType {
    EventType::Bet
}

/// 金额配置
///
/// PERCENTAGE 时 `value` 为百分比：发放时以事件的 `base_field` 为基数，
/// 释放时以锁定奖金总额为基数。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AmountConfig {
    pub amount_type: AmountType,
    pub value: Decimal,
    #[serde(default)]
    pub max_amount: Option<Decimal>,
    /// 百分比发放时从事件中读取基数的字段
    #[serde(default = "default_base_field")]
    pub base_field: String,
}

impl AmountConfig {
    pub fn fixed(value: Decimal) -> Self {
        Self {
            amount_type: AmountType::Fixed,
            value,
            max_amount: None,
            base_field: default_base_field(),
        }
    }

    pub fn percentage(value: Decimal) -> Self {
        Self {
            amount_type: AmountType::Percentage,
            value,
            max_amount: None,
            base_field: default_base_field(),
        }
    }

    pub fn with_max(mut self, max_amount: Decimal) -> Self {
        self.max_amount = Some(max_amount);
        self
    }

    fn validate(&self) -> std::result::Result<(), String> {
        if self.value <= Decimal::ZERO {
            return Err(format!("金额配置必须为正数: {}", self.value));
        }
        if let Some(max) = self.max_amount
            && max <= Decimal::ZERO
        {
            return Err(format!("封顶金额必须为正数: {max}"));
        }
        Ok(())
    }
}

/// 释放阶段
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReleaseStage {
    /// 阶段序号，按升序依次释放
    pub stage: i32,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_stage_trigger")]
    pub trigger_event: EventType,
    /// 释放条件，通常基于 `usage.wagered`
    #[serde(default)]
    pub rules: RuleSet,
    pub release: AmountConfig,
}

/// 奖金活动
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Campaign {
    pub id: i64,
    pub name: String,
    #[sqlx(default)]
    pub description: Option<String>,
    pub status: CampaignStatus,
    /// 触发发放的事件类型
    pub trigger_event: EventType,
    pub start_at: DateTime<Utc>,
    /// 为空表示长期有效
    #[sqlx(default)]
    pub end_at: Option<DateTime<Utc>>,
    /// 资格条件，空集合对所有人开放
    pub eligibility: Json<RuleSet>,
    /// 白名单，为空表示不限制
    pub allowed_users: Vec<String>,
    pub max_usage_per_user: i32,
    pub bonus_kind: BonusKind,
    pub bonus: Json<AmountConfig>,
    pub release_schedule: Json<Vec<ReleaseStage>>,
    /// 锁定奖金有效天数，为空表示不过期
    #[sqlx(default)]
    pub bonus_validity_days: Option<i32>,
    /// 提现时没收剩余锁定奖金
    pub forfeit_on_withdrawal: bool,
    /// 优先级，数值越大越先评估
    pub priority: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Campaign {
    pub fn is_active(&self) -> bool {
        self.status == CampaignStatus::Active
    }

    /// 检查活动时间窗口，两端均为闭区间
    pub fn is_within_window(&self, now: DateTime<Utc>) -> bool {
        self.start_at <= now && self.end_at.is_none_or(|end| now <= end)
    }

    pub fn allows_user(&self, user_id: &str) -> bool {
        self.allowed_users.is_empty() || self.allowed_users.iter().any(|u| u == user_id)
    }

    /// 按阶段序号升序排列的释放计划
    pub fn sorted_stages(&self) -> Vec<&ReleaseStage> {
        let mut stages: Vec<&ReleaseStage> = self.release_schedule.iter().collect();
        stages.sort_by_key(|s| s.stage);
        stages
    }

    pub fn last_stage(&self) -> Option<i32> {
        self.release_schedule.iter().map(|s| s.stage).max()
    }

    /// 锁定奖金的过期时间
    pub fn bonus_expires_at(&self, credited_at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self.bonus_kind {
            BonusKind::Locked => self
                .bonus_validity_days
                .map(|days| credited_at + Duration::days(i64::from(days))),
            BonusKind::Unlocked => None,
        }
    }

    /// 校验活动配置
    pub fn validate(&self) -> Result<()> {
        self.check().map_err(|reason| BonusError::InvalidCampaign {
            campaign_id: self.id,
            reason,
        })
    }

    fn check(&self) -> std::result::Result<(), String> {
        if let Some(end) = self.end_at
            && end <= self.start_at
        {
            return Err("结束时间必须晚于开始时间".to_string());
        }

        if self.max_usage_per_user < 1 {
            return Err(format!(
                "每人参与次数必须至少为 1: {}",
                self.max_usage_per_user
            ));
        }

        self.bonus.validate()?;
        self.eligibility
            .validate()
            .map_err(|e| format!("资格条件无效: {e}"))?;

        match self.bonus_kind {
            BonusKind::Locked if self.release_schedule.is_empty() => {
                return Err("锁定奖金活动至少需要一个释放阶段".to_string());
            }
            BonusKind::Unlocked if !self.release_schedule.is_empty() => {
                return Err("直接发放的活动不能配置释放阶段".to_string());
            }
            _ => {}
        }

        let mut seen = HashSet::new();
        for stage in self.release_schedule.iter() {
            if !seen.insert(stage.stage) {
                return Err(format!("阶段序号重复: {}", stage.stage));
            }
            if stage.stage < 1 {
                return Err(format!("阶段序号必须从 1 开始: {}", stage.stage));
            }
            stage.release.validate()?;
            if stage.release.amount_type == AmountType::Percentage
                && stage.release.value > Decimal::ONE_HUNDRED
            {
                return Err(format!(
                    "阶段 {} 的释放比例超过 100: {}",
                    stage.stage, stage.release.value
                ));
            }
            stage
                .rules
                .validate()
                .map_err(|e| format!("阶段 {} 释放条件无效: {e}", stage.stage))?;
        }

        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use rule_engine::{Condition, ConditionScope, Operator};

    /// 充值 100% 锁定奖金，封顶 200，两个流水阶段
    pub fn locked_deposit_campaign(id: i64) -> Campaign {
        let now = Utc::now();
        Campaign {
            id,
            name: format!("首充奖励 {id}"),
            description: None,
            status: CampaignStatus::Active,
            trigger_event: EventType::Deposit,
            start_at: now - Duration::days(1),
            end_at: Some(now + Duration::days(30)),
            eligibility: Json(RuleSet::all(vec![Condition::new(
                ConditionScope::Event,
                "amount",
                Operator::Gte,
                20,
            )])),
            allowed_users: vec![],
            max_usage_per_user: 1,
            bonus_kind: BonusKind::Locked,
            bonus: Json(
                AmountConfig::percentage(Decimal::ONE_HUNDRED).with_max(Decimal::from(200)),
            ),
            release_schedule: Json(vec![
                ReleaseStage {
                    stage: 1,
                    name: "流水 5 倍".to_string(),
                    trigger_event: EventType::Bet,
                    rules: RuleSet::all(vec![Condition::new(
                        ConditionScope::Usage,
                        "wagered",
                        Operator::Gte,
                        500,
                    )]),
                    release: AmountConfig::percentage(Decimal::from(50)),
                },
                ReleaseStage {
                    stage: 2,
                    name: "流水 10 倍".to_string(),
                    trigger_event: EventType::Bet,
                    rules: RuleSet::all(vec![Condition::new(
                        ConditionScope::Usage,
                        "wagered",
                        Operator::Gte,
                        1000,
                    )]),
                    release: AmountConfig::percentage(Decimal::from(50)),
                },
            ]),
            bonus_validity_days: Some(30),
            forfeit_on_withdrawal: true,
            priority: 10,
            created_at: now,
            updated_at: now,
        }
    }

    /// 注册送 10 元可用奖金
    pub fn unlocked_registration_campaign(id: i64) -> Campaign {
        let mut campaign = locked_deposit_campaign(id);
        campaign.name = format!("注册礼金 {id}");
        campaign.trigger_event = EventType::Registration;
        campaign.eligibility = Json(RuleSet::default());
        campaign.bonus_kind = BonusKind::Unlocked;
        campaign.bonus = Json(AmountConfig::fixed(Decimal::from(10)));
        campaign.release_schedule = Json(vec![]);
        campaign.bonus_validity_days = None;
        campaign.forfeit_on_withdrawal = false;
        campaign.priority = 0;
        campaign
    }
}
