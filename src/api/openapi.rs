//! OpenAPI document assembled from the handler annotations.

use axum::Router;
use utoipa::OpenApi;

use crate::api::dto::{
    AmountRequest, ButtonClickRequest, CheckoutResponse, CommandResponse,
    ConversationListResponse, CreateRequestRequest, CreateUserRequest, LedgerEntryDto,
    LedgerResponse, MessageListResponse, OpenConversationResponse, OpenDirectRequest,
    RequestResponse, SeenResponse, SendMessageRequest, UserResponse, WalletResponse,
    WebhookAckResponse, WithdrawalResponse,
};
use crate::api::handlers::{conversations, payments, requests, system, users, wallet};
use crate::app_state::AppState;
use crate::domain::view::{ConversationView, MessageSummary, MessageView};
use crate::error::{ErrorBody, ErrorResponse};

/// The gateway's API description.
#[derive(Debug, OpenApi)]
#[openapi(
    info(
        title = "parley-gateway",
        description = "Negotiated brand-influencer chats with escrowed payments."
    ),
    paths(
        system::health_handler,
        users::create_user,
        requests::create_request,
        requests::connect_request,
        conversations::open_direct,
        conversations::list_conversations,
        conversations::get_conversation,
        conversations::list_messages,
        conversations::send_message,
        conversations::button_click,
        conversations::mark_seen,
        conversations::checkout,
        payments::payment_webhook,
        wallet::get_wallet,
        wallet::get_ledger,
        wallet::create_deposit,
        wallet::create_withdrawal,
    ),
    components(schemas(
        system::HealthResponse,
        ErrorResponse,
        ErrorBody,
        CreateUserRequest,
        UserResponse,
        CreateRequestRequest,
        RequestResponse,
        OpenDirectRequest,
        OpenConversationResponse,
        ConversationListResponse,
        ConversationView,
        MessageSummary,
        MessageView,
        MessageListResponse,
        SendMessageRequest,
        ButtonClickRequest,
        CommandResponse,
        SeenResponse,
        CheckoutResponse,
        WebhookAckResponse,
        WalletResponse,
        LedgerEntryDto,
        LedgerResponse,
        AmountRequest,
        WithdrawalResponse,
    )),
    tags(
        (name = "System", description = "Liveness"),
        (name = "Users", description = "Marketplace accounts"),
        (name = "Requests", description = "Influencer applications and connect"),
        (name = "Conversations", description = "Negotiation and chat"),
        (name = "Payments", description = "Escrow checkout and gateway webhook"),
        (name = "Wallet", description = "Balances, ledger, deposits and withdrawals"),
    )
)]
pub struct ApiDoc;

/// Serves the raw document at `/api-docs/openapi.json` and, with the
/// `swagger-ui` feature, the UI at `/swagger-ui`.
pub fn routes() -> Router<AppState> {
    #[cfg(feature = "swagger-ui")]
    {
        Router::new().merge(
            utoipa_swagger_ui::SwaggerUi::new("/swagger-ui")
                .url("/api-docs/openapi.json", ApiDoc::openapi()),
        )
    }
    #[cfg(not(feature = "swagger-ui"))]
    {
        use axum::Json;
        use axum::routing::get;
        Router::new().route(
            "/api-docs/openapi.json",
            get(|| async { Json(ApiDoc::openapi()) }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_every_resource() {
        let doc = ApiDoc::openapi();
        for path in [
            "/health",
            "/api/v1/users",
            "/api/v1/requests/{id}/connect",
            "/api/v1/conversations/{id}/button-click",
            "/api/v1/payments/webhook",
            "/api/v1/wallet/withdrawals",
        ] {
            assert!(doc.paths.paths.contains_key(path), "missing {path}");
        }
    }
}
