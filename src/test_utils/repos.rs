//! In-memory mock implementations of the repository traits.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{NaiveDateTime, Utc};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::{
    app_error::{AppError, AppResult},
    application::use_cases::{
        billing::{
            InvoiceProfile, InvoiceRepoTrait, InvoiceUpsert, MigrationOutcome, PlanProfile,
            PlanRepoTrait, PlanUpsert, SubscriptionProfile, SubscriptionRepoTrait,
            SubscriptionUpsert,
        },
        event_log::{EventLogFilter, NewWebhookEvent, WebhookEventProfile, WebhookEventRepoTrait},
        identity::{NewUser, UserProfile, UserRepoTrait},
    },
    domain::entities::{
        subscription::SubscriptionStatus,
        user::UserStatus,
        webhook_event::{EventStatus, Provider},
    },
};

fn now() -> NaiveDateTime {
    Utc::now().naive_utc()
}

// ============================================================================
// InMemoryUserRepo
// ============================================================================

#[derive(Default)]
pub struct InMemoryUserRepo {
    pub users: Mutex<Vec<UserProfile>>,
}

impl InMemoryUserRepo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_users(users: Vec<UserProfile>) -> Self {
        Self {
            users: Mutex::new(users),
        }
    }

    pub fn push(&self, user: UserProfile) {
        self.users.lock().unwrap().push(user);
    }

    pub fn get(&self, id: Uuid) -> Option<UserProfile> {
        self.users
            .lock()
            .unwrap()
            .iter()
            .find(|u| u.id == id)
            .cloned()
    }
}

#[async_trait]
impl UserRepoTrait for InMemoryUserRepo {
    async fn get_by_id(&self, id: Uuid) -> AppResult<Option<UserProfile>> {
        Ok(self.get(id))
    }

    async fn get_by_external_id(&self, external_id: &str) -> AppResult<Option<UserProfile>> {
        Ok(self
            .users
            .lock()
            .unwrap()
            .iter()
            .find(|u| u.external_id.as_deref() == Some(external_id))
            .cloned())
    }

    async fn get_by_email(&self, email: &str) -> AppResult<Option<UserProfile>> {
        Ok(self
            .users
            .lock()
            .unwrap()
            .iter()
            .find(|u| u.email.as_deref() == Some(email))
            .cloned())
    }

    async fn insert(&self, user: NewUser) -> AppResult<UserProfile> {
        let profile = UserProfile {
            id: Uuid::new_v4(),
            external_id: user.external_id,
            email: user.email,
            first_name: user.first_name,
            last_name: user.last_name,
            profile_image_url: user.profile_image_url,
            status: UserStatus::Active,
            subscription_status: None,
            deleted_at: None,
            created_at: now(),
        };
        self.users.lock().unwrap().push(profile.clone());
        Ok(profile)
    }

    async fn update_profile(
        &self,
        id: Uuid,
        email: Option<&str>,
        first_name: Option<&str>,
        last_name: Option<&str>,
        profile_image_url: Option<&str>,
    ) -> AppResult<UserProfile> {
        let mut users = self.users.lock().unwrap();
        let user = users
            .iter_mut()
            .find(|u| u.id == id)
            .ok_or(AppError::NotFound)?;
        if let Some(email) = email {
            user.email = Some(email.to_string());
        }
        if let Some(first) = first_name {
            user.first_name = Some(first.to_string());
        }
        if let Some(last) = last_name {
            user.last_name = Some(last.to_string());
        }
        if let Some(url) = profile_image_url {
            user.profile_image_url = Some(url.to_string());
        }
        Ok(user.clone())
    }

    async fn adopt_external_id(&self, id: Uuid, external_id: &str) -> AppResult<()> {
        let mut users = self.users.lock().unwrap();
        let user = users
            .iter_mut()
            .find(|u| u.id == id)
            .ok_or(AppError::NotFound)?;
        user.external_id = Some(external_id.to_string());
        Ok(())
    }

    async fn set_status(
        &self,
        id: Uuid,
        status: UserStatus,
        deleted_at: Option<NaiveDateTime>,
    ) -> AppResult<()> {
        let mut users = self.users.lock().unwrap();
        let user = users
            .iter_mut()
            .find(|u| u.id == id)
            .ok_or(AppError::NotFound)?;
        user.status = status;
        user.deleted_at = deleted_at;
        Ok(())
    }

    async fn set_subscription_mirror(&self, id: Uuid, status: Option<&str>) -> AppResult<()> {
        let mut users = self.users.lock().unwrap();
        let user = users
            .iter_mut()
            .find(|u| u.id == id)
            .ok_or(AppError::NotFound)?;
        user.subscription_status = status.map(str::to_string);
        Ok(())
    }
}

// ============================================================================
// InMemorySubscriptionRepo
// ============================================================================

#[derive(Default)]
pub struct InMemorySubscriptionRepo {
    pub rows: Mutex<Vec<SubscriptionProfile>>,
    /// When set, migrate_to checks the owner's status and updates the
    /// mirror, matching the real transaction.
    users: Option<Arc<InMemoryUserRepo>>,
}

impl InMemorySubscriptionRepo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_users(users: Arc<InMemoryUserRepo>) -> Self {
        Self {
            rows: Mutex::new(Vec::new()),
            users: Some(users),
        }
    }

    pub fn push(&self, row: SubscriptionProfile) {
        self.rows.lock().unwrap().push(row);
    }

    pub fn get(&self, subscription_id: &str) -> Option<SubscriptionProfile> {
        self.rows
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.subscription_id == subscription_id)
            .cloned()
    }
}

fn is_active_row(row: &SubscriptionProfile) -> bool {
    row.status == SubscriptionStatus::Active && row.canceled_at.is_none()
}

#[async_trait]
impl SubscriptionRepoTrait for InMemorySubscriptionRepo {
    async fn get_by_subscription_id(
        &self,
        subscription_id: &str,
    ) -> AppResult<Option<SubscriptionProfile>> {
        Ok(self.get(subscription_id))
    }

    async fn list_by_user(&self, user_id: &str) -> AppResult<Vec<SubscriptionProfile>> {
        let mut rows: Vec<_> = self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.user_id.as_deref() == Some(user_id))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }

    async fn list_active_by_user(&self, user_id: &str) -> AppResult<Vec<SubscriptionProfile>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.user_id.as_deref() == Some(user_id) && is_active_row(r))
            .cloned()
            .collect())
    }

    async fn find_current_for_user(
        &self,
        user_id: &str,
    ) -> AppResult<Option<SubscriptionProfile>> {
        let rows = self.list_active_by_user(user_id).await?;
        Ok(rows.into_iter().max_by_key(|r| r.created_at))
    }

    async fn upsert(&self, sub: SubscriptionUpsert) -> AppResult<SubscriptionProfile> {
        let mut rows = self.rows.lock().unwrap();
        if let Some(row) = rows
            .iter_mut()
            .find(|r| r.subscription_id == sub.subscription_id)
        {
            row.user_id = sub.user_id.or(row.user_id.take());
            row.email = sub.email.or(row.email.take());
            row.status = sub.status;
            row.customer_id = sub.customer_id.or(row.customer_id.take());
            row.plan_id = sub.plan_id.or(row.plan_id.take());
            row.current_period_start = sub.current_period_start.or(row.current_period_start);
            row.current_period_end = sub.current_period_end.or(row.current_period_end);
            row.default_payment_method_id = sub
                .default_payment_method_id
                .or(row.default_payment_method_id.take());
            if sub.previous_plan_id.is_some() {
                row.previous_plan_id = sub.previous_plan_id;
                row.plan_changed_at = sub.plan_changed_at;
            }
            row.canceled_at = sub.canceled_at;
            row.cancel_at_period_end = sub.cancel_at_period_end;
            return Ok(row.clone());
        }

        let row = SubscriptionProfile {
            id: Uuid::new_v4(),
            subscription_id: sub.subscription_id,
            user_id: sub.user_id,
            email: sub.email,
            status: sub.status,
            customer_id: sub.customer_id,
            plan_id: sub.plan_id,
            current_period_start: sub.current_period_start,
            current_period_end: sub.current_period_end,
            default_payment_method_id: sub.default_payment_method_id,
            previous_plan_id: sub.previous_plan_id,
            plan_changed_at: sub.plan_changed_at,
            canceled_at: sub.canceled_at,
            cancel_at_period_end: sub.cancel_at_period_end,
            cancellation_reason: None,
            cancel_requested_at: None,
            created_at: now(),
        };
        rows.push(row.clone());
        Ok(row)
    }

    async fn mark_cancelled(
        &self,
        subscription_id: &str,
        canceled_at: NaiveDateTime,
        reason: Option<&str>,
    ) -> AppResult<()> {
        let mut rows = self.rows.lock().unwrap();
        let row = rows
            .iter_mut()
            .find(|r| r.subscription_id == subscription_id)
            .ok_or(AppError::NotFound)?;
        row.status = SubscriptionStatus::Cancelled;
        row.canceled_at = Some(canceled_at);
        if reason.is_some() {
            row.cancellation_reason = reason.map(str::to_string);
        }
        Ok(())
    }

    async fn set_cancel_flag(
        &self,
        subscription_id: &str,
        cancel: bool,
        reason: Option<&str>,
        requested_at: Option<NaiveDateTime>,
    ) -> AppResult<()> {
        let mut rows = self.rows.lock().unwrap();
        let row = rows
            .iter_mut()
            .find(|r| r.subscription_id == subscription_id)
            .ok_or(AppError::NotFound)?;
        row.cancel_at_period_end = cancel;
        row.cancellation_reason = reason.map(str::to_string);
        row.cancel_requested_at = requested_at;
        Ok(())
    }

    async fn relink_user(&self, email: &str, user_id: &str) -> AppResult<u64> {
        let mut rows = self.rows.lock().unwrap();
        let mut count = 0;
        for row in rows.iter_mut() {
            if row.email.as_deref() == Some(email) && row.user_id.as_deref() != Some(user_id) {
                row.user_id = Some(user_id.to_string());
                count += 1;
            }
        }
        Ok(count)
    }

    async fn migrate_to(
        &self,
        user_id: &str,
        new_subscription_id: &str,
        previous_plan_id: Option<&str>,
    ) -> AppResult<MigrationOutcome> {
        if let Some(users) = &self.users {
            let owner = users.get_by_external_id(user_id).await?;
            if let Some(owner) = &owner
                && owner.status.is_deactivated()
            {
                return Err(AppError::DeactivatedUser);
            }
        }

        let superseded = {
            let mut rows = self.rows.lock().unwrap();
            let mut superseded = Vec::new();
            for row in rows.iter_mut() {
                if row.user_id.as_deref() == Some(user_id)
                    && row.subscription_id != new_subscription_id
                    && is_active_row(row)
                {
                    row.status = SubscriptionStatus::Cancelled;
                    row.canceled_at = Some(now());
                    superseded.push(row.clone());
                }
            }
            let new_row = rows
                .iter_mut()
                .find(|r| r.subscription_id == new_subscription_id)
                .ok_or(AppError::NotFound)?;
            new_row.status = SubscriptionStatus::Active;
            new_row.canceled_at = None;
            new_row.cancel_at_period_end = false;
            new_row.cancellation_reason = None;
            new_row.cancel_requested_at = None;
            if let Some(prev) = previous_plan_id {
                new_row.previous_plan_id = Some(prev.to_string());
                new_row.plan_changed_at = Some(now());
            }
            superseded
        };

        if let Some(users) = &self.users
            && let Some(owner) = users.get_by_external_id(user_id).await?
        {
            users
                .set_subscription_mirror(owner.id, Some("active"))
                .await?;
        }

        Ok(MigrationOutcome { superseded })
    }
}

// ============================================================================
// InMemoryPlanRepo
// ============================================================================

#[derive(Default)]
pub struct InMemoryPlanRepo {
    pub plans: Mutex<Vec<PlanProfile>>,
}

impl InMemoryPlanRepo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_plans(plans: Vec<PlanProfile>) -> Self {
        Self {
            plans: Mutex::new(plans),
        }
    }
}

#[async_trait]
impl PlanRepoTrait for InMemoryPlanRepo {
    async fn get_by_plan_id(&self, plan_id: &str) -> AppResult<Option<PlanProfile>> {
        Ok(self
            .plans
            .lock()
            .unwrap()
            .iter()
            .find(|p| p.plan_id == plan_id)
            .cloned())
    }

    async fn list_active(&self) -> AppResult<Vec<PlanProfile>> {
        Ok(self
            .plans
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.active)
            .cloned()
            .collect())
    }

    async fn upsert(&self, plan: PlanUpsert) -> AppResult<PlanProfile> {
        let mut plans = self.plans.lock().unwrap();
        if let Some(existing) = plans.iter_mut().find(|p| p.plan_id == plan.plan_id) {
            existing.name = plan.name;
            existing.description = plan.description;
            existing.amount_cents = plan.amount_cents;
            existing.currency = plan.currency;
            existing.interval = plan.interval;
            existing.active = plan.active;
            existing.metadata = plan.metadata;
            existing.updated_at = now();
            return Ok(existing.clone());
        }
        let profile = PlanProfile {
            id: Uuid::new_v4(),
            plan_id: plan.plan_id,
            name: plan.name,
            description: plan.description,
            amount_cents: plan.amount_cents,
            currency: plan.currency,
            interval: plan.interval,
            active: plan.active,
            metadata: plan.metadata,
            created_at: now(),
            updated_at: now(),
        };
        plans.push(profile.clone());
        Ok(profile)
    }

    async fn deactivate(&self, plan_id: &str) -> AppResult<()> {
        let mut plans = self.plans.lock().unwrap();
        if let Some(plan) = plans.iter_mut().find(|p| p.plan_id == plan_id) {
            plan.active = false;
        }
        Ok(())
    }

    async fn deactivate_by_product(&self, product_id: &str) -> AppResult<u64> {
        let mut plans = self.plans.lock().unwrap();
        let mut count = 0;
        for plan in plans.iter_mut() {
            let matches = plan
                .metadata
                .as_ref()
                .and_then(|m| m["product_id"].as_str())
                == Some(product_id);
            if matches && plan.active {
                plan.active = false;
                count += 1;
            }
        }
        Ok(count)
    }

    async fn deactivate_missing(&self, keep_plan_ids: &[String]) -> AppResult<u64> {
        let mut plans = self.plans.lock().unwrap();
        let mut count = 0;
        for plan in plans.iter_mut() {
            if plan.active && !keep_plan_ids.contains(&plan.plan_id) {
                plan.active = false;
                count += 1;
            }
        }
        Ok(count)
    }
}

// ============================================================================
// InMemoryInvoiceRepo
// ============================================================================

#[derive(Default)]
pub struct InMemoryInvoiceRepo {
    pub invoices: Mutex<Vec<InvoiceProfile>>,
}

impl InMemoryInvoiceRepo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, invoice: InvoiceProfile) {
        self.invoices.lock().unwrap().push(invoice);
    }
}

#[async_trait]
impl InvoiceRepoTrait for InMemoryInvoiceRepo {
    async fn get_by_invoice_id(&self, invoice_id: &str) -> AppResult<Option<InvoiceProfile>> {
        Ok(self
            .invoices
            .lock()
            .unwrap()
            .iter()
            .find(|i| i.invoice_id == invoice_id)
            .cloned())
    }

    async fn upsert(&self, invoice: InvoiceUpsert) -> AppResult<InvoiceProfile> {
        let mut invoices = self.invoices.lock().unwrap();
        if let Some(existing) = invoices
            .iter_mut()
            .find(|i| i.invoice_id == invoice.invoice_id)
        {
            existing.subscription_id = invoice.subscription_id.or(existing.subscription_id.take());
            existing.amount_paid_cents = invoice.amount_paid_cents.or(existing.amount_paid_cents);
            existing.amount_due_cents = invoice.amount_due_cents.or(existing.amount_due_cents);
            existing.currency = invoice.currency.or(existing.currency.take());
            existing.status = invoice.status;
            existing.user_id = invoice.user_id.or(existing.user_id.take());
            existing.email = invoice.email.or(existing.email.take());
            existing.period_start = invoice.period_start.or(existing.period_start);
            existing.period_end = invoice.period_end.or(existing.period_end);
            existing.payment_intent = invoice.payment_intent.or(existing.payment_intent.take());
            return Ok(existing.clone());
        }
        let profile = InvoiceProfile {
            id: Uuid::new_v4(),
            invoice_id: invoice.invoice_id,
            subscription_id: invoice.subscription_id,
            amount_paid_cents: invoice.amount_paid_cents,
            amount_due_cents: invoice.amount_due_cents,
            currency: invoice.currency,
            status: invoice.status,
            user_id: invoice.user_id,
            email: invoice.email,
            period_start: invoice.period_start,
            period_end: invoice.period_end,
            payment_intent: invoice.payment_intent,
            created_at: now(),
        };
        invoices.push(profile.clone());
        Ok(profile)
    }

    async fn list_by_user(
        &self,
        user_id: &str,
        limit: i64,
        offset: i64,
    ) -> AppResult<Vec<InvoiceProfile>> {
        let invoices = self.invoices.lock().unwrap();
        let mut matching: Vec<_> = invoices
            .iter()
            .filter(|i| i.user_id.as_deref() == Some(user_id))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matching
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn count_by_user(&self, user_id: &str) -> AppResult<i64> {
        let invoices = self.invoices.lock().unwrap();
        Ok(invoices
            .iter()
            .filter(|i| i.user_id.as_deref() == Some(user_id))
            .count() as i64)
    }
}

// ============================================================================
// InMemoryWebhookEventRepo
// ============================================================================

#[derive(Default)]
pub struct InMemoryWebhookEventRepo {
    pub events: Mutex<Vec<WebhookEventProfile>>,
}

impl InMemoryWebhookEventRepo {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WebhookEventRepoTrait for InMemoryWebhookEventRepo {
    async fn insert(&self, event: NewWebhookEvent) -> AppResult<Option<WebhookEventProfile>> {
        let mut events = self.events.lock().unwrap();
        if events
            .iter()
            .any(|e| e.provider == event.provider && e.event_id == event.event_id)
        {
            return Ok(None);
        }
        let profile = WebhookEventProfile {
            id: Uuid::new_v4(),
            provider: event.provider,
            event_id: event.event_id,
            event_type: event.event_type,
            status: EventStatus::Pending,
            payload: event.payload,
            error: None,
            retry_count: 0,
            user_id: event.user_id,
            resolution: event.resolution,
            metadata: event.metadata,
            created_at: now(),
            processed_at: None,
        };
        events.push(profile.clone());
        Ok(Some(profile))
    }

    async fn advance_status(
        &self,
        id: Uuid,
        next: EventStatus,
        error: Option<&str>,
        metadata_patch: &JsonValue,
    ) -> AppResult<bool> {
        let mut events = self.events.lock().unwrap();
        let Some(event) = events.iter_mut().find(|e| e.id == id) else {
            return Ok(false);
        };
        if !event.status.can_transition_to(next) {
            return Ok(false);
        }
        event.status = next;
        if next == EventStatus::Failed {
            event.retry_count += 1;
        }
        if let Some(err) = error {
            event.error = Some(err.to_string());
        }
        if let (Some(meta), Some(patch)) =
            (event.metadata.as_object_mut(), metadata_patch.as_object())
        {
            for (key, value) in patch {
                meta.insert(key.clone(), value.clone());
            }
        }
        if next.is_terminal() {
            event.processed_at = Some(now());
        }
        Ok(true)
    }

    async fn get_by_id(&self, id: Uuid) -> AppResult<Option<WebhookEventProfile>> {
        Ok(self
            .events
            .lock()
            .unwrap()
            .iter()
            .find(|e| e.id == id)
            .cloned())
    }

    async fn get_by_event_id(
        &self,
        provider: Provider,
        event_id: &str,
    ) -> AppResult<Option<WebhookEventProfile>> {
        Ok(self
            .events
            .lock()
            .unwrap()
            .iter()
            .find(|e| e.provider == provider && e.event_id == event_id)
            .cloned())
    }

    async fn list(
        &self,
        filter: &EventLogFilter,
        limit: i64,
        offset: i64,
    ) -> AppResult<Vec<WebhookEventProfile>> {
        let events = self.events.lock().unwrap();
        let mut matching: Vec<_> = events
            .iter()
            .filter(|e| matches_filter(e, filter))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matching
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn count(&self, filter: &EventLogFilter) -> AppResult<i64> {
        let events = self.events.lock().unwrap();
        Ok(events.iter().filter(|e| matches_filter(e, filter)).count() as i64)
    }
}

fn matches_filter(event: &WebhookEventProfile, filter: &EventLogFilter) -> bool {
    if let Some(substr) = &filter.event_type
        && !event.event_type.contains(substr.as_str())
    {
        return false;
    }
    if let Some(provider) = filter.provider
        && event.provider != provider
    {
        return false;
    }
    if let Some(status) = filter.status
        && event.status != status
    {
        return false;
    }
    if let Some(from) = filter.from
        && event.created_at < from
    {
        return false;
    }
    if let Some(to) = filter.to
        && event.created_at > to
    {
        return false;
    }
    true
}
