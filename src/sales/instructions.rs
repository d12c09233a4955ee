use std::fmt;

use serde::{Deserialize, Serialize};

use super::catalog::{PaymentMethod, Product};
use super::order::REGISTER_SALE;

/// Prebuilt voices offered by the engine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum VoiceName {
    #[default]
    Zephyr,
    Puck,
    Charon,
    Kore,
    Fenrir,
}

impl fmt::Display for VoiceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            VoiceName::Zephyr => "Zephyr",
            VoiceName::Puck => "Puck",
            VoiceName::Charon => "Charon",
            VoiceName::Kore => "Kore",
            VoiceName::Fenrir => "Fenrir",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssistantTone {
    #[default]
    Friendly,
    Professional,
}

/// Who the assistant speaks for and how it sounds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssistantProfile {
    pub company_name: String,
    #[serde(default)]
    pub voice: VoiceName,
    #[serde(default)]
    pub tone: AssistantTone,
}

impl Default for AssistantProfile {
    fn default() -> Self {
        Self {
            company_name: "Our Store".to_string(),
            voice: VoiceName::default(),
            tone: AssistantTone::default(),
        }
    }
}

/// Assemble the engine's behavioral instructions
pub fn build_instructions(
    profile: &AssistantProfile,
    products: &[Product],
    payment_methods: &[PaymentMethod],
) -> String {
    let catalog = if products.is_empty() {
        "(no products listed, ask the owner)".to_string()
    } else {
        products
            .iter()
            .map(|p| format!("{} (${:.2})", p.name, p.price))
            .collect::<Vec<_>>()
            .join(", ")
    };

    let payments = if payment_methods.is_empty() {
        "(no payment methods listed, ask the owner)".to_string()
    } else {
        payment_methods
            .iter()
            .map(|m| format!("{}: {}", m.name, m.details))
            .collect::<Vec<_>>()
            .join(", ")
    };

    let tone = match profile.tone {
        AssistantTone::Friendly => "Speak warmly and casually, like a trusted neighborhood seller.",
        AssistantTone::Professional => "Keep a courteous, professional register at all times.",
    };

    format!(
        "You are the sales autopilot of {company}. Your goal is to close sales \
         arriving over WhatsApp.\n\
         {tone}\n\
         Always start by asking: \"Boss, a WhatsApp message just arrived, do you want \
         me to take care of this customer?\"\n\
         If the boss says yes:\n\
         1. Greet the customer as a {company} salesperson.\n\
         2. Offer products from the catalog: {catalog}.\n\
         3. If the customer wants to pay, use these methods: {payments}.\n\
         4. Once the customer confirms, call `{tool}` with the customer name, the items \
         and the payment method, then say: \"Sale closed boss, the receipt is ready to \
         download.\"",
        company = profile.company_name,
        tone = tone,
        catalog = catalog,
        payments = payments,
        tool = REGISTER_SALE,
    )
}
