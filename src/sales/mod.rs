//! Sales-side collaborators of the voice session
//!
//! The catalog and the order sink are external; this module only defines
//! their interfaces, assembles engine instructions from a catalog snapshot,
//! and turns closed-sale tool calls into orders.

mod catalog;
mod instructions;
mod order;

pub use catalog::{CatalogProvider, PaymentMethod, Product, StaticCatalog};
pub use instructions::{build_instructions, AssistantProfile, AssistantTone, VoiceName};
pub use order::{
    register_sale_declaration, LoggingOrderSink, Order, OrderError, OrderItem, OrderSink,
    OrderStatus, SaleSignal, REGISTER_SALE,
};
