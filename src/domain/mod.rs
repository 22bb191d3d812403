//! Domain layer: conversations, messages, actions, the escrow ledger and
//! the realtime event system.
//!
//! Everything here is synchronous and free of I/O. The flow engine plans
//! transitions over these types, the stores persist them and the service
//! layer moves them between the two.

pub mod action;
pub mod chat_event;
pub mod command;
pub mod conversation;
pub mod event_bus;
pub mod ids;
pub mod ledger;
pub mod message;
pub mod money;
pub mod payment;
pub mod request;
pub mod settings;
pub mod user;
pub mod view;

pub use action::{Action, ActionComponent, Button, ButtonId, ButtonIntent, ButtonKind};
pub use chat_event::{ChatEvent, RoomEvent, UnreadAction};
pub use command::{Actor, Command, CommandKind};
pub use conversation::{
    AwaitingRole, Binding, ChatStatus, Conversation, ConversationRecord, FlowState,
};
pub use event_bus::EventBus;
pub use ids::{ConversationId, LedgerEntryId, MessageId, OrderId, RequestId, UserId};
pub use ledger::{LedgerBook, LedgerEffect, LedgerEntry, LedgerRefs, Wallet};
pub use message::{Message, MessageBody, MessageType, NewMessage};
pub use money::{AmountLimits, CommissionRate, Minor};
pub use payment::{OrderPurpose, OrderStatus, PaymentOrder};
pub use request::{Request, RequestStatus};
pub use user::{Role, User, UserSummary};
pub use view::{ConversationView, MessageSummary, MessageView};
