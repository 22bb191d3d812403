//! PostgreSQL implementation of [`ChatStore`].
//!
//! Each write runs in one transaction. Conversations are locked with
//! `SELECT ... FOR UPDATE` and written back with a guarded
//! `UPDATE ... WHERE flow_state = $n AND version = $m`. Wallets are locked
//! in ascending user order before the escrow book runs, so concurrent
//! settlements touching the same wallets cannot deadlock.

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use super::rows::{
    self, AuditRow, CONVERSATION_COLUMNS, ConversationRow, LEDGER_COLUMNS, LedgerRow,
    MESSAGE_COLUMNS, MessageRow, ORDER_COLUMNS, OrderRow, REQUEST_COLUMNS, RequestRow,
    USER_COLUMNS, UserRow, WALLET_COLUMNS, WalletRow,
};
use super::{ChatStore, CommitOutcome, NewConversation, OpenedConversation, TransitionCommit};
use crate::domain::conversation::{Conversation, ConversationRecord, FlowState};
use crate::domain::ledger::{LedgerBook, LedgerChanges, LedgerEffect, LedgerEntry, LedgerRefs, Wallet};
use crate::domain::message::{Message, NewMessage, next_created_at};
use crate::domain::money::Minor;
use crate::domain::payment::{OrderSettlement, OrderStatus, PaymentOrder};
use crate::domain::request::{Request, RequestStatus};
use crate::domain::settings::SettingAudit;
use crate::domain::user::User;
use crate::domain::{ConversationId, MessageId, RequestId, UserId};
use crate::error::GatewayError;

fn db(e: sqlx::Error) -> GatewayError {
    GatewayError::PersistenceError(e.to_string())
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(inner) if inner.is_unique_violation())
}

fn to_i64(value: u64, what: &str) -> Result<i64, GatewayError> {
    i64::try_from(value).map_err(|_| GatewayError::Internal(format!("{what} out of range")))
}

fn to_i32(value: u32, what: &str) -> Result<i32, GatewayError> {
    i32::try_from(value).map_err(|_| GatewayError::Internal(format!("{what} out of range")))
}

/// PostgreSQL-backed store using `sqlx::PgPool`.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Wraps an existing pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Opens a pool and runs the embedded migrations.
    ///
    /// # Errors
    ///
    /// Returns a [`GatewayError::PersistenceError`] if the database is
    /// unreachable or a migration fails.
    pub async fn connect(
        url: &str,
        max_connections: u32,
        min_connections: u32,
        connect_timeout: Duration,
    ) -> Result<Self, GatewayError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(connect_timeout)
            .connect(url)
            .await
            .map_err(db)?;
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| GatewayError::PersistenceError(e.to_string()))?;
        Ok(Self::new(pool))
    }
}

async fn fetch_conversation(
    conn: &mut PgConnection,
    id: ConversationId,
    lock: bool,
) -> Result<Conversation, GatewayError> {
    let sql = format!(
        "SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = $1{}",
        if lock { " FOR UPDATE" } else { "" }
    );
    let row = sqlx::query_as::<_, ConversationRow>(&sql)
        .bind(id.as_uuid())
        .fetch_optional(&mut *conn)
        .await
        .map_err(db)?;
    row.map(rows::conversation)
        .transpose()?
        .ok_or_else(|| GatewayError::NotFound(format!("conversation {id}")))
}

async fn fetch_users(
    conn: &mut PgConnection,
    ids: &[Uuid],
) -> Result<HashMap<UserId, User>, GatewayError> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = ANY($1)");
    let rows = sqlx::query_as::<_, UserRow>(&sql)
        .bind(ids)
        .fetch_all(&mut *conn)
        .await
        .map_err(db)?;
    rows.into_iter()
        .map(|row| rows::user(row).map(|u| (u.id, u)))
        .collect()
}

fn assemble(
    conversation: Conversation,
    users: &HashMap<UserId, User>,
) -> Result<ConversationRecord, GatewayError> {
    let find = |id: UserId| {
        users
            .get(&id)
            .cloned()
            .ok_or_else(|| GatewayError::NotFound(format!("user {id}")))
    };
    Ok(ConversationRecord {
        brand_owner: find(conversation.brand_owner_id)?,
        influencer: find(conversation.influencer_id)?,
        conversation,
    })
}

async fn record_of(
    conn: &mut PgConnection,
    conversation: Conversation,
) -> Result<ConversationRecord, GatewayError> {
    let ids = [
        *conversation.brand_owner_id.as_uuid(),
        *conversation.influencer_id.as_uuid(),
    ];
    let users = fetch_users(conn, &ids).await?;
    assemble(conversation, &users)
}

async fn insert_messages(
    conn: &mut PgConnection,
    id: ConversationId,
    new: Vec<NewMessage>,
    now: DateTime<Utc>,
) -> Result<Vec<Message>, GatewayError> {
    if new.is_empty() {
        return Ok(Vec::new());
    }
    let mut last = sqlx::query_scalar::<_, Option<DateTime<Utc>>>(
        "SELECT max(created_at) FROM messages WHERE conversation_id = $1",
    )
    .bind(id.as_uuid())
    .fetch_one(&mut *conn)
    .await
    .map_err(db)?;

    let mut written = Vec::with_capacity(new.len());
    for message in new {
        let created_at = next_created_at(now, last);
        let stored = message.into_message(id, created_at);
        sqlx::query(
            "INSERT INTO messages (id, conversation_id, sender_id, receiver_id, body, \
             message_type, seen, created_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(stored.id.as_uuid())
        .bind(id.as_uuid())
        .bind(stored.sender_id.as_uuid())
        .bind(stored.receiver_id.as_uuid())
        .bind(rows::message_body(&stored.body)?)
        .bind(stored.message_type.as_str())
        .bind(stored.seen)
        .bind(stored.created_at)
        .execute(&mut *conn)
        .await
        .map_err(db)?;
        last = Some(created_at);
        written.push(stored);
    }
    Ok(written)
}

async fn write_conversation(
    conn: &mut PgConnection,
    next: &Conversation,
    expected_state: FlowState,
    expected_version: u64,
) -> Result<(), GatewayError> {
    let result = sqlx::query(
        "UPDATE conversations SET chat_status = $4, flow_state = $5, awaiting_role = $6, \
         final_agreed_amount = $7, pending_offer = $8, negotiation_round = $9, \
         escrow_hold_id = $10, gateway_order_id = $11, version = $12, \
         last_activity_at = $13, updated_at = $14 \
         WHERE id = $1 AND flow_state = $2 AND version = $3",
    )
    .bind(next.id.as_uuid())
    .bind(expected_state.as_str())
    .bind(to_i64(expected_version, "version")?)
    .bind(next.chat_status.as_str())
    .bind(next.flow_state.as_str())
    .bind(next.awaiting_role.as_str())
    .bind(next.final_agreed_amount)
    .bind(next.pending_offer)
    .bind(to_i32(next.negotiation_round, "negotiation round")?)
    .bind(next.escrow_hold_id.map(Uuid::from))
    .bind(next.gateway_order_id.as_deref())
    .bind(to_i64(next.version, "version")?)
    .bind(next.last_activity_at)
    .bind(next.updated_at)
    .execute(&mut *conn)
    .await
    .map_err(db)?;

    if result.rows_affected() == 0 {
        return Err(GatewayError::Conflict {
            current: expected_state,
        });
    }
    Ok(())
}

async fn advance_request(
    conn: &mut PgConnection,
    request_id: Option<RequestId>,
    to: FlowState,
    now: DateTime<Utc>,
) -> Result<(), GatewayError> {
    let Some(request_id) = request_id else {
        return Ok(());
    };
    let current = sqlx::query_scalar::<_, String>(
        "SELECT status FROM requests WHERE id = $1 FOR UPDATE",
    )
    .bind(request_id.as_uuid())
    .fetch_optional(&mut *conn)
    .await
    .map_err(db)?;
    let Some(current) = current else {
        return Ok(());
    };
    let current: RequestStatus = current.parse()?;
    let next = RequestStatus::for_flow(to, current);
    if next != current {
        sqlx::query("UPDATE requests SET status = $2, updated_at = $3 WHERE id = $1")
            .bind(request_id.as_uuid())
            .bind(next.as_str())
            .bind(now)
            .execute(&mut *conn)
            .await
            .map_err(db)?;
    }
    Ok(())
}

/// Locks (creating if needed) the wallets of `users`, ascending by id.
async fn lock_wallets(
    conn: &mut PgConnection,
    users: &BTreeSet<UserId>,
) -> Result<Vec<Wallet>, GatewayError> {
    let ids: Vec<Uuid> = users.iter().map(|u| *u.as_uuid()).collect();
    sqlx::query(
        "INSERT INTO wallets (user_id) SELECT unnest($1::uuid[]) ORDER BY 1 \
         ON CONFLICT (user_id) DO NOTHING",
    )
    .bind(&ids)
    .execute(&mut *conn)
    .await
    .map_err(db)?;
    let sql = format!(
        "SELECT {WALLET_COLUMNS} FROM wallets WHERE user_id = ANY($1) ORDER BY user_id FOR UPDATE"
    );
    let rows = sqlx::query_as::<_, WalletRow>(&sql)
        .bind(&ids)
        .fetch_all(&mut *conn)
        .await
        .map_err(db)?;
    Ok(rows.into_iter().map(rows::wallet).collect())
}

async fn persist_ledger(conn: &mut PgConnection, changes: LedgerChanges) -> Result<(), GatewayError> {
    for wallet in &changes.wallets {
        sqlx::query(
            "UPDATE wallets SET available = $2, frozen = $3, withdrawn = $4, updated_at = now() \
             WHERE user_id = $1",
        )
        .bind(wallet.user_id.as_uuid())
        .bind(wallet.available)
        .bind(wallet.frozen)
        .bind(wallet.withdrawn)
        .execute(&mut *conn)
        .await
        .map_err(db)?;
    }
    for entry in &changes.entries {
        sqlx::query(
            "INSERT INTO ledger_entries (id, user_id, direction, kind, amount_minor, status, \
             conversation_id, request_id, gateway_payment_id, hold_id, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(entry.id.as_uuid())
        .bind(entry.user_id.as_uuid())
        .bind(entry.direction.as_str())
        .bind(entry.kind.as_str())
        .bind(entry.amount_minor)
        .bind(entry.status.as_str())
        .bind(entry.refs.conversation_id.map(Uuid::from))
        .bind(entry.refs.request_id.map(Uuid::from))
        .bind(entry.refs.gateway_payment_id.as_deref())
        .bind(entry.refs.hold_id.map(Uuid::from))
        .bind(entry.created_at)
        .execute(&mut *conn)
        .await
        .map_err(db)?;
    }
    Ok(())
}

/// Runs a planned ledger effect against a working book of the wallets and
/// hold entries involved.
async fn run_effect(
    conn: &mut PgConnection,
    effect: &LedgerEffect,
    now: DateTime<Utc>,
) -> Result<Vec<LedgerEntry>, GatewayError> {
    let Some(hold_id) = effect.hold_id() else {
        return Ok(Vec::new());
    };
    let sql = format!(
        "SELECT {LEDGER_COLUMNS} FROM ledger_entries WHERE id = $1 OR hold_id = $1 \
         ORDER BY created_at, seq"
    );
    let entries = sqlx::query_as::<_, LedgerRow>(&sql)
        .bind(hold_id.as_uuid())
        .fetch_all(&mut *conn)
        .await
        .map_err(db)?
        .into_iter()
        .map(rows::ledger_entry)
        .collect::<Result<Vec<_>, _>>()?;

    let mut users: BTreeSet<UserId> = effect.known_users().into_iter().collect();
    users.extend(entries.iter().map(|e| e.user_id));
    let wallets = lock_wallets(conn, &users).await?;

    let mut book = LedgerBook::from_parts(wallets, entries);
    let written = book.apply_effect(effect, now)?;
    persist_ledger(conn, book.changes()).await?;
    Ok(written)
}

#[async_trait]
impl ChatStore for PostgresStore {
    async fn upsert_user(&self, user: &User) -> Result<(), GatewayError> {
        sqlx::query(
            "INSERT INTO users (id, role, display_name, avatar_url) VALUES ($1, $2, $3, $4) \
             ON CONFLICT (id) DO UPDATE SET role = EXCLUDED.role, \
             display_name = EXCLUDED.display_name, avatar_url = EXCLUDED.avatar_url",
        )
        .bind(user.id.as_uuid())
        .bind(user.role.as_str())
        .bind(&user.display_name)
        .bind(user.avatar_url.as_deref())
        .execute(&self.pool)
        .await
        .map_err(db)?;
        Ok(())
    }

    async fn get_user(&self, id: UserId) -> Result<User, GatewayError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(db)?;
        row.map(rows::user)
            .transpose()?
            .ok_or_else(|| GatewayError::NotFound(format!("user {id}")))
    }

    async fn insert_request(&self, request: &Request) -> Result<(), GatewayError> {
        let (campaign_id, bid_id) = request.binding.columns();
        sqlx::query(
            "INSERT INTO requests (id, influencer_id, brand_owner_id, campaign_id, bid_id, \
             status, created_at, updated_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(request.id.as_uuid())
        .bind(request.influencer_id.as_uuid())
        .bind(request.brand_owner_id.as_uuid())
        .bind(campaign_id)
        .bind(bid_id)
        .bind(request.status.as_str())
        .bind(request.created_at)
        .bind(request.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                GatewayError::InvalidRequest(format!("request {} already exists", request.id))
            } else {
                db(e)
            }
        })?;
        Ok(())
    }

    async fn get_request(&self, id: RequestId) -> Result<Request, GatewayError> {
        let sql = format!("SELECT {REQUEST_COLUMNS} FROM requests WHERE id = $1");
        let row = sqlx::query_as::<_, RequestRow>(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(db)?;
        row.map(rows::request)
            .transpose()?
            .ok_or_else(|| GatewayError::NotFound(format!("request {id}")))
    }

    async fn create_conversation(
        &self,
        new: NewConversation,
    ) -> Result<OpenedConversation, GatewayError> {
        let conversation = new.conversation;
        let mut tx = self.pool.begin().await.map_err(db)?;

        let (campaign_id, bid_id) = conversation.binding.columns();
        let inserted = sqlx::query(
            "INSERT INTO conversations (id, brand_owner_id, influencer_id, campaign_id, bid_id, \
             request_id, chat_status, flow_state, awaiting_role, negotiation_round, version, \
             last_activity_at, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14) \
             ON CONFLICT DO NOTHING",
        )
        .bind(conversation.id.as_uuid())
        .bind(conversation.brand_owner_id.as_uuid())
        .bind(conversation.influencer_id.as_uuid())
        .bind(campaign_id)
        .bind(bid_id)
        .bind(conversation.request_id.map(Uuid::from))
        .bind(conversation.chat_status.as_str())
        .bind(conversation.flow_state.as_str())
        .bind(conversation.awaiting_role.as_str())
        .bind(to_i32(conversation.negotiation_round, "negotiation round")?)
        .bind(to_i64(conversation.version, "version")?)
        .bind(conversation.last_activity_at)
        .bind(conversation.created_at)
        .bind(conversation.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(db)?;

        if inserted.rows_affected() == 0 {
            let row = match conversation.request_id {
                Some(request_id) => {
                    let sql = format!(
                        "SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE request_id = $1"
                    );
                    sqlx::query_as::<_, ConversationRow>(&sql)
                        .bind(request_id.as_uuid())
                        .fetch_optional(&mut *tx)
                        .await
                }
                None => {
                    let sql = format!(
                        "SELECT {CONVERSATION_COLUMNS} FROM conversations \
                         WHERE campaign_id IS NULL AND bid_id IS NULL \
                         AND LEAST(brand_owner_id, influencer_id) = LEAST($1, $2) \
                         AND GREATEST(brand_owner_id, influencer_id) = GREATEST($1, $2)"
                    );
                    sqlx::query_as::<_, ConversationRow>(&sql)
                        .bind(conversation.brand_owner_id.as_uuid())
                        .bind(conversation.influencer_id.as_uuid())
                        .fetch_optional(&mut *tx)
                        .await
                }
            }
            .map_err(db)?;
            let Some(row) = row else {
                return Err(GatewayError::PersistenceError(format!(
                    "conversation {} conflicted with a row that no longer exists",
                    conversation.id
                )));
            };
            let existing = rows::conversation(row)?;
            let record = record_of(&mut tx, existing).await?;
            tx.commit().await.map_err(db)?;
            return Ok(OpenedConversation {
                record,
                messages: Vec::new(),
                created: false,
            });
        }

        let now = Utc::now();
        let messages =
            insert_messages(&mut tx, conversation.id, new.opening.into_iter().collect(), now)
                .await?;
        advance_request(&mut tx, conversation.request_id, conversation.flow_state, now).await?;
        let record = record_of(&mut tx, conversation).await?;
        tx.commit().await.map_err(db)?;
        Ok(OpenedConversation {
            record,
            messages,
            created: true,
        })
    }

    async fn load(&self, id: ConversationId) -> Result<ConversationRecord, GatewayError> {
        let mut conn = self.pool.acquire().await.map_err(db)?;
        let conversation = fetch_conversation(&mut conn, id, false).await?;
        record_of(&mut conn, conversation).await
    }

    async fn append_message(
        &self,
        id: ConversationId,
        expected_version: u64,
        message: NewMessage,
    ) -> Result<CommitOutcome, GatewayError> {
        let mut tx = self.pool.begin().await.map_err(db)?;
        let current = fetch_conversation(&mut tx, id, true).await?;
        if current.version != expected_version {
            return Err(GatewayError::Conflict {
                current: current.flow_state,
            });
        }
        let now = Utc::now();
        let next = Conversation {
            version: current.version + 1,
            last_activity_at: now,
            updated_at: now,
            ..current.clone()
        };
        write_conversation(&mut tx, &next, current.flow_state, current.version).await?;
        let messages = insert_messages(&mut tx, id, vec![message], now).await?;
        tx.commit().await.map_err(db)?;
        Ok(CommitOutcome {
            conversation: next,
            messages,
            ledger_entries: Vec::new(),
        })
    }

    async fn apply_transition(
        &self,
        commit: TransitionCommit,
    ) -> Result<CommitOutcome, GatewayError> {
        let TransitionCommit {
            conversation_id: id,
            plan,
            settlement,
        } = commit;
        let mut tx = self.pool.begin().await.map_err(db)?;
        let now = Utc::now();

        let current = fetch_conversation(&mut tx, id, true).await?;
        if current.flow_state != plan.from || current.version != plan.expected_version {
            return Err(GatewayError::Conflict {
                current: current.flow_state,
            });
        }

        if let Some(settlement) = &settlement {
            let status = sqlx::query_scalar::<_, String>(
                "SELECT status FROM payment_orders WHERE id = $1 FOR UPDATE",
            )
            .bind(settlement.order_id.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(db)?
            .ok_or_else(|| GatewayError::NotFound(format!("order {}", settlement.order_id)))?;
            if status.parse::<OrderStatus>()?.is_final() {
                return Err(GatewayError::Conflict {
                    current: current.flow_state,
                });
            }
        }

        let ledger_entries = run_effect(&mut tx, &plan.ledger, now).await?;

        let next = plan.patch.apply(&current, now);
        write_conversation(&mut tx, &next, current.flow_state, current.version).await?;
        let messages = insert_messages(&mut tx, id, plan.messages, now).await?;
        advance_request(&mut tx, next.request_id, next.flow_state, now).await?;

        if let Some(settlement) = settlement {
            sqlx::query(
                "UPDATE payment_orders SET status = $2, gateway_payment_id = $3, updated_at = $4 \
                 WHERE id = $1",
            )
            .bind(settlement.order_id.as_uuid())
            .bind(settlement.status.as_str())
            .bind(&settlement.gateway_payment_id)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(db)?;
        }

        tx.commit().await.map_err(db)?;
        Ok(CommitOutcome {
            conversation: next,
            messages,
            ledger_entries,
        })
    }

    async fn unread_count(&self, id: ConversationId, user: UserId) -> Result<u64, GatewayError> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT count(*) FROM messages \
             WHERE conversation_id = $1 AND receiver_id = $2 AND NOT seen",
        )
        .bind(id.as_uuid())
        .bind(user.as_uuid())
        .fetch_one(&self.pool)
        .await
        .map_err(db)?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    async fn last_message(&self, id: ConversationId) -> Result<Option<Message>, GatewayError> {
        let sql = format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE conversation_id = $1 \
             ORDER BY created_at DESC LIMIT 1"
        );
        let row = sqlx::query_as::<_, MessageRow>(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(db)?;
        row.map(rows::message).transpose()
    }

    async fn list_messages(
        &self,
        id: ConversationId,
        before: Option<DateTime<Utc>>,
        limit: u32,
    ) -> Result<Vec<Message>, GatewayError> {
        let mut conn = self.pool.acquire().await.map_err(db)?;
        fetch_conversation(&mut conn, id, false).await?;
        let sql = format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE conversation_id = $1 \
             AND ($2::timestamptz IS NULL OR created_at < $2) \
             ORDER BY created_at DESC LIMIT $3"
        );
        let rows = sqlx::query_as::<_, MessageRow>(&sql)
            .bind(id.as_uuid())
            .bind(before)
            .bind(i64::from(limit))
            .fetch_all(&mut *conn)
            .await
            .map_err(db)?;
        let mut page = rows
            .into_iter()
            .map(rows::message)
            .collect::<Result<Vec<_>, _>>()?;
        page.reverse();
        Ok(page)
    }

    async fn list_conversations(
        &self,
        user: UserId,
        cursor: Option<DateTime<Utc>>,
        limit: u32,
    ) -> Result<Vec<ConversationRecord>, GatewayError> {
        let mut conn = self.pool.acquire().await.map_err(db)?;
        let sql = format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations \
             WHERE (brand_owner_id = $1 OR influencer_id = $1) \
             AND ($2::timestamptz IS NULL OR updated_at < $2) \
             ORDER BY updated_at DESC, id DESC LIMIT $3"
        );
        let conversations = sqlx::query_as::<_, ConversationRow>(&sql)
            .bind(user.as_uuid())
            .bind(cursor)
            .bind(i64::from(limit))
            .fetch_all(&mut *conn)
            .await
            .map_err(db)?
            .into_iter()
            .map(rows::conversation)
            .collect::<Result<Vec<_>, _>>()?;

        let ids: BTreeSet<Uuid> = conversations
            .iter()
            .flat_map(|c| c.participants())
            .map(Uuid::from)
            .collect();
        let ids: Vec<Uuid> = ids.into_iter().collect();
        let users = fetch_users(&mut conn, &ids).await?;
        conversations
            .into_iter()
            .map(|c| assemble(c, &users))
            .collect()
    }

    async fn mark_seen(
        &self,
        id: ConversationId,
        reader: UserId,
    ) -> Result<Vec<MessageId>, GatewayError> {
        let mut conn = self.pool.acquire().await.map_err(db)?;
        fetch_conversation(&mut conn, id, false).await?;
        let ids = sqlx::query_scalar::<_, Uuid>(
            "UPDATE messages SET seen = TRUE \
             WHERE conversation_id = $1 AND receiver_id = $2 AND NOT seen RETURNING id",
        )
        .bind(id.as_uuid())
        .bind(reader.as_uuid())
        .fetch_all(&mut *conn)
        .await
        .map_err(db)?;
        Ok(ids.into_iter().map(Into::into).collect())
    }

    async fn find_idle(
        &self,
        cutoff: DateTime<Utc>,
        states: &[FlowState],
    ) -> Result<Vec<Conversation>, GatewayError> {
        let names: Vec<String> = states.iter().map(|s| s.as_str().to_string()).collect();
        let sql = format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations \
             WHERE flow_state = ANY($1) AND last_activity_at < $2"
        );
        sqlx::query_as::<_, ConversationRow>(&sql)
            .bind(&names)
            .bind(cutoff)
            .fetch_all(&self.pool)
            .await
            .map_err(db)?
            .into_iter()
            .map(rows::conversation)
            .collect()
    }

    async fn set_gateway_order(
        &self,
        id: ConversationId,
        gateway_order_id: &str,
    ) -> Result<(), GatewayError> {
        let result = sqlx::query("UPDATE conversations SET gateway_order_id = $2 WHERE id = $1")
            .bind(id.as_uuid())
            .bind(gateway_order_id)
            .execute(&self.pool)
            .await
            .map_err(db)?;
        if result.rows_affected() == 0 {
            return Err(GatewayError::NotFound(format!("conversation {id}")));
        }
        Ok(())
    }

    async fn wallet(&self, user: UserId) -> Result<Wallet, GatewayError> {
        let sql = format!("SELECT {WALLET_COLUMNS} FROM wallets WHERE user_id = $1");
        let row = sqlx::query_as::<_, WalletRow>(&sql)
            .bind(user.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(db)?;
        Ok(row.map_or_else(|| Wallet::empty(user), rows::wallet))
    }

    async fn ledger_entries(&self, user: UserId) -> Result<Vec<LedgerEntry>, GatewayError> {
        let sql = format!(
            "SELECT {LEDGER_COLUMNS} FROM ledger_entries WHERE user_id = $1 \
             ORDER BY created_at DESC, seq DESC"
        );
        sqlx::query_as::<_, LedgerRow>(&sql)
            .bind(user.as_uuid())
            .fetch_all(&self.pool)
            .await
            .map_err(db)?
            .into_iter()
            .map(rows::ledger_entry)
            .collect()
    }

    async fn withdraw(
        &self,
        user: UserId,
        amount: Minor,
        refs: LedgerRefs,
    ) -> Result<(Wallet, LedgerEntry), GatewayError> {
        let mut tx = self.pool.begin().await.map_err(db)?;
        let wallets = lock_wallets(&mut tx, &BTreeSet::from([user])).await?;
        let mut book = LedgerBook::from_parts(wallets, Vec::new());
        let entry = book.withdraw(user, amount, refs, Utc::now())?;
        persist_ledger(&mut tx, book.changes()).await?;
        tx.commit().await.map_err(db)?;
        Ok((book.wallet(user), entry))
    }

    async fn insert_order(&self, order: &PaymentOrder) -> Result<(), GatewayError> {
        let (purpose, conversation_id) = order.purpose.columns();
        sqlx::query(
            "INSERT INTO payment_orders (id, gateway_order_id, user_id, purpose, conversation_id, \
             amount_minor, currency, status, gateway_payment_id, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(order.id.as_uuid())
        .bind(&order.gateway_order_id)
        .bind(order.user_id.as_uuid())
        .bind(purpose)
        .bind(conversation_id.map(Uuid::from))
        .bind(order.amount_minor)
        .bind(&order.currency)
        .bind(order.status.as_str())
        .bind(order.gateway_payment_id.as_deref())
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                GatewayError::InvalidRequest(format!(
                    "gateway order {} already recorded",
                    order.gateway_order_id
                ))
            } else {
                db(e)
            }
        })?;
        Ok(())
    }

    async fn find_order(
        &self,
        gateway_order_id: &str,
    ) -> Result<Option<PaymentOrder>, GatewayError> {
        let sql = format!("SELECT {ORDER_COLUMNS} FROM payment_orders WHERE gateway_order_id = $1");
        let row = sqlx::query_as::<_, OrderRow>(&sql)
            .bind(gateway_order_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db)?;
        row.map(rows::order).transpose()
    }

    async fn settle_deposit(
        &self,
        settlement: OrderSettlement,
    ) -> Result<Option<LedgerEntry>, GatewayError> {
        let mut tx = self.pool.begin().await.map_err(db)?;
        let now = Utc::now();
        let sql = format!("SELECT {ORDER_COLUMNS} FROM payment_orders WHERE id = $1 FOR UPDATE");
        let order = sqlx::query_as::<_, OrderRow>(&sql)
            .bind(settlement.order_id.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(db)?
            .map(rows::order)
            .transpose()?
            .ok_or_else(|| GatewayError::NotFound(format!("order {}", settlement.order_id)))?;
        if order.status.is_final() {
            return Ok(None);
        }

        let wallets = lock_wallets(&mut tx, &BTreeSet::from([order.user_id])).await?;
        let mut book = LedgerBook::from_parts(wallets, Vec::new());
        let refs = LedgerRefs {
            conversation_id: order.purpose.columns().1,
            gateway_payment_id: Some(settlement.gateway_payment_id.clone()),
            ..LedgerRefs::default()
        };
        let entry = book.deposit(order.user_id, order.amount_minor, refs, now)?;
        persist_ledger(&mut tx, book.changes()).await?;

        sqlx::query(
            "UPDATE payment_orders SET status = $2, gateway_payment_id = $3, updated_at = $4 \
             WHERE id = $1",
        )
        .bind(order.id.as_uuid())
        .bind(OrderStatus::Paid.as_str())
        .bind(&settlement.gateway_payment_id)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(db)?;
        tx.commit().await.map_err(db)?;
        Ok(Some(entry))
    }

    async fn fail_order(&self, settlement: OrderSettlement) -> Result<(), GatewayError> {
        sqlx::query(
            "UPDATE payment_orders SET status = $2, gateway_payment_id = $3, updated_at = now() \
             WHERE id = $1 AND status IN ($4, $5)",
        )
        .bind(settlement.order_id.as_uuid())
        .bind(OrderStatus::Failed.as_str())
        .bind(&settlement.gateway_payment_id)
        .bind(OrderStatus::Created.as_str())
        .bind(OrderStatus::Cancelled.as_str())
        .execute(&self.pool)
        .await
        .map_err(db)?;
        Ok(())
    }

    async fn cancel_order(&self, gateway_order_id: &str) -> Result<(), GatewayError> {
        sqlx::query(
            "UPDATE payment_orders SET status = $2, updated_at = now() \
             WHERE gateway_order_id = $1 AND status = $3",
        )
        .bind(gateway_order_id)
        .bind(OrderStatus::Cancelled.as_str())
        .bind(OrderStatus::Created.as_str())
        .execute(&self.pool)
        .await
        .map_err(db)?;
        Ok(())
    }

    async fn get_setting(&self, key: &str) -> Result<Option<String>, GatewayError> {
        sqlx::query_scalar::<_, String>("SELECT value FROM system_settings WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(db)
    }

    async fn put_setting(
        &self,
        key: &str,
        value: &str,
        changed_by: UserId,
    ) -> Result<SettingAudit, GatewayError> {
        let mut tx = self.pool.begin().await.map_err(db)?;
        let old_value = sqlx::query_scalar::<_, String>(
            "SELECT value FROM system_settings WHERE key = $1 FOR UPDATE",
        )
        .bind(key)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db)?;
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO system_settings (key, value, updated_at) VALUES ($1, $2, $3) \
             ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, updated_at = EXCLUDED.updated_at",
        )
        .bind(key)
        .bind(value)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(db)?;
        sqlx::query(
            "INSERT INTO settings_audit (key, old_value, new_value, changed_by, changed_at) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(key)
        .bind(old_value.as_deref())
        .bind(value)
        .bind(changed_by.as_uuid())
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(db)?;
        tx.commit().await.map_err(db)?;
        Ok(SettingAudit {
            key: key.to_string(),
            old_value,
            new_value: value.to_string(),
            changed_by,
            changed_at: now,
        })
    }

    async fn setting_history(&self, key: &str) -> Result<Vec<SettingAudit>, GatewayError> {
        let rows = sqlx::query_as::<_, AuditRow>(
            "SELECT key, old_value, new_value, changed_by, changed_at FROM settings_audit \
             WHERE key = $1 ORDER BY id",
        )
        .bind(key)
        .fetch_all(&self.pool)
        .await
        .map_err(db)?;
        Ok(rows.into_iter().map(rows::audit).collect())
    }
}
