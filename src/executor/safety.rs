//! Rule-based safety gate. Pure functions over keyword tables and the current
//! `ScreenState`; nothing here performs I/O.
use std::sync::OnceLock;

use regex::Regex;

use crate::agent_engine::state::Action;
use crate::config::SafetyConfig;
use crate::perception::types::ScreenState;

pub const PAYMENT_APPS: &[&str] = &[
    "com.eg.android.AlipayGphone",
    "com.tencent.mm",
    "com.unionpay",
    "com.android.vending",
];

pub const PAYMENT_KEYWORDS: &[&str] = &[
    "支付", "付款", "确认支付", "输入密码", "验证码", "pay", "payment", "确认订单", "立即购买",
    "提交订单", "金额", "¥",
];

pub const SENSITIVE_KEYWORDS: &[&str] = &[
    "删除", "卸载", "清除数据", "恢复出厂", "格式化", "delete", "uninstall", "factory reset",
    "format",
];

pub const CONFIRMATION_KEYWORDS: &[&str] = &[
    "发送", "分享", "授权", "允许", "同意", "提交", "确认", "继续", "send", "share", "grant",
    "allow", "agree", "confirm", "submit", "authorize",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SafetyLevel {
    Green,
    Yellow,
    Red,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SafetyVerdict {
    pub should_block: bool,
    pub reason: String,
    pub level: SafetyLevel,
    pub needs_confirmation: bool,
}

impl SafetyVerdict {
    pub fn allow() -> Self {
        Self {
            should_block: false,
            reason: String::new(),
            level: SafetyLevel::Green,
            needs_confirmation: false,
        }
    }

    pub fn block(reason: impl Into<String>) -> Self {
        Self {
            should_block: true,
            reason: reason.into(),
            level: SafetyLevel::Red,
            needs_confirmation: true,
        }
    }

    pub fn caution(reason: impl Into<String>) -> Self {
        Self {
            should_block: false,
            reason: reason.into(),
            level: SafetyLevel::Yellow,
            needs_confirmation: true,
        }
    }
}

fn pii_patterns() -> &'static [Regex; 3] {
    static PATTERNS: OnceLock<[Regex; 3]> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            // bank card
            Regex::new(r"\d{16,19}").expect("static card regex"),
            // national id
            Regex::new(r"\d{17}[\dxX]").expect("static id regex"),
            // mobile number
            Regex::new(r"1[3-9]\d{9}").expect("static phone regex"),
        ]
    })
}

fn contains_any(haystack: &str, needles: &[String]) -> bool {
    let haystack = haystack.to_lowercase();
    needles
        .iter()
        .any(|n| !n.is_empty() && haystack.contains(&n.to_lowercase()))
}

pub struct SafetyGate {
    rules: SafetyConfig,
}

impl SafetyGate {
    pub fn new(rules: SafetyConfig) -> Self {
        Self { rules }
    }

    /// Evaluated once per step, before the decision call. Red wins over Yellow.
    pub fn check_state(&self, state: &ScreenState) -> SafetyVerdict {
        if self.is_payment_scene(state) {
            tracing::warn!(app = %state.foreground_app, "payment scene detected; blocking");
            return SafetyVerdict::block(
                "Payment screen detected. Automatic execution paused; please complete the payment manually.",
            );
        }
        if self.contains_sensitive_operation(state) {
            tracing::warn!("destructive operation keywords on screen");
            return SafetyVerdict::caution(
                "Potentially destructive operation on screen; please confirm before continuing.",
            );
        }
        if self.needs_confirmation(state) {
            tracing::debug!("screen asks for authorization or sending");
            return SafetyVerdict::caution(
                "This step authorizes or sends something; please confirm manually.",
            );
        }
        SafetyVerdict::allow()
    }

    /// Evaluated once per candidate action, before execution.
    pub fn check_action(&self, action: &Action, state: &ScreenState) -> SafetyVerdict {
        match action {
            Action::Input { .. } if self.is_payment_scene(state) => {
                tracing::warn!("refusing text input on a payment screen");
                SafetyVerdict::block("Payment screen detected; automatic text input is not allowed.")
            }
            _ => SafetyVerdict::allow(),
        }
    }

    /// Coarse level without the confirmation-button check.
    pub fn safety_level(&self, state: &ScreenState) -> SafetyLevel {
        if self.is_payment_scene(state) {
            SafetyLevel::Red
        } else if self.contains_sensitive_operation(state) {
            SafetyLevel::Yellow
        } else {
            SafetyLevel::Green
        }
    }

    fn is_payment_scene(&self, state: &ScreenState) -> bool {
        let app = state.foreground_app.to_lowercase();
        let on_payment_app = self
            .rules
            .payment_apps
            .iter()
            .any(|p| !p.is_empty() && app.contains(&p.to_lowercase()));
        if !on_payment_app {
            return false;
        }
        let keywords = &self.rules.payment_keywords;
        let text_hit = state.extracted_text.iter().any(|t| contains_any(t, keywords));
        let element_hit = state.elements.iter().any(|e| {
            contains_any(&e.text, keywords) || contains_any(&e.accessibility_label, keywords)
        });
        text_hit || element_hit
    }

    fn contains_sensitive_operation(&self, state: &ScreenState) -> bool {
        state
            .extracted_text
            .iter()
            .any(|t| contains_any(t, &self.rules.sensitive_keywords))
    }

    fn needs_confirmation(&self, state: &ScreenState) -> bool {
        let keywords = &self.rules.confirmation_keywords;
        state.extracted_text.iter().any(|t| contains_any(t, keywords))
            && state
                .elements
                .iter()
                .any(|e| e.is_actionable() && contains_any(&e.text, keywords))
    }
}

/// Detects bank-card, national-id and mobile-number digit runs. Spaces are ignored.
pub fn contains_sensitive_info(text: &str) -> bool {
    let compact: String = text.chars().filter(|c| *c != ' ').collect();
    pii_patterns().iter().any(|re| re.is_match(&compact))
}
