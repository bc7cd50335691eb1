use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::db::billing_customer_repository::BillingCustomerRepository;
use crate::db::plan_repository::PlanRepository;
use crate::db::subscription_repository::SubscriptionRepository;
use crate::models::billing_customer::BillingCustomer;
use crate::models::plan::Plan;
use crate::models::subscription::{
    SortDirection, Subscription, SubscriptionPage, SubscriptionQuery, SubscriptionSortField,
};

fn mock_failure() -> sqlx::Error {
    sqlx::Error::Protocol("Mock DB failure".into())
}

/// In-memory subscriptions table. Enforces the unique Stripe subscription id the
/// same way the real table does.
#[derive(Clone, Default)]
pub struct InMemorySubscriptionRepository {
    rows: Arc<Mutex<Vec<Subscription>>>,
    pub should_fail: Arc<AtomicBool>,
    pub writes: Arc<Mutex<usize>>,
}

impl InMemorySubscriptionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rows(rows: Vec<Subscription>) -> Self {
        let repo = Self::default();
        *repo.rows.lock().unwrap() = rows;
        repo
    }

    pub fn all(&self) -> Vec<Subscription> {
        self.rows.lock().unwrap().clone()
    }

    pub fn write_count(&self) -> usize {
        *self.writes.lock().unwrap()
    }

    fn check(&self) -> Result<(), sqlx::Error> {
        if self.should_fail.load(Ordering::SeqCst) {
            return Err(mock_failure());
        }
        Ok(())
    }

    fn bump_writes(&self) {
        *self.writes.lock().unwrap() += 1;
    }
}

fn matches_query(sub: &Subscription, query: &SubscriptionQuery) -> bool {
    if query.status.is_some_and(|s| s != sub.status) {
        return false;
    }
    if let Some(plan) = query.plan.as_ref() {
        if !sub
            .plan
            .to_lowercase()
            .contains(&plan.trim().to_lowercase())
        {
            return false;
        }
    }
    if query.plan_id.is_some() && query.plan_id != sub.plan_id {
        return false;
    }
    if query.stripe_subscription_id.is_some()
        && query.stripe_subscription_id != sub.stripe_subscription_id
    {
        return false;
    }
    if query.user_id.is_some_and(|u| u != sub.user_id) {
        return false;
    }
    if let Some(from) = query.started_from {
        if !sub.started_at.is_some_and(|s| s >= from) {
            return false;
        }
    }
    if let Some(to) = query.started_to {
        if !sub.started_at.is_some_and(|s| s <= to) {
            return false;
        }
    }
    true
}

fn compare(a: &Subscription, b: &Subscription, field: SubscriptionSortField) -> std::cmp::Ordering {
    match field {
        SubscriptionSortField::CreatedAt => a.created_at.cmp(&b.created_at),
        SubscriptionSortField::UpdatedAt => a.updated_at.cmp(&b.updated_at),
        SubscriptionSortField::StartedAt => a.started_at.cmp(&b.started_at),
        SubscriptionSortField::CurrentPeriodEnd => {
            a.current_period_end.cmp(&b.current_period_end)
        }
        SubscriptionSortField::Status => a.status.as_str().cmp(b.status.as_str()),
        SubscriptionSortField::Plan => a.plan.cmp(&b.plan),
    }
}

#[async_trait]
impl SubscriptionRepository for InMemorySubscriptionRepository {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Subscription>, sqlx::Error> {
        self.check()?;
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.id == id)
            .cloned())
    }

    async fn find_by_stripe_subscription_id(
        &self,
        stripe_subscription_id: &str,
    ) -> Result<Option<Subscription>, sqlx::Error> {
        self.check()?;
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.stripe_subscription_id.as_deref() == Some(stripe_subscription_id))
            .cloned())
    }

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<Subscription>, sqlx::Error> {
        self.check()?;
        let mut rows: Vec<Subscription> = self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }

    async fn find_current_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Option<Subscription>, sqlx::Error> {
        Ok(self
            .list_for_user(user_id)
            .await?
            .into_iter()
            .find(|s| s.status.is_current()))
    }

    async fn search(&self, query: &SubscriptionQuery) -> Result<SubscriptionPage, sqlx::Error> {
        self.check()?;
        let mut rows: Vec<Subscription> = self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|s| matches_query(s, query))
            .cloned()
            .collect();

        let field = query.sort_by.unwrap_or_default();
        let dir = query.sort_dir.unwrap_or_default();
        rows.sort_by(|a, b| {
            let ord = compare(a, b, field);
            let ord = match dir {
                SortDirection::Asc => ord,
                SortDirection::Desc => ord.reverse(),
            };
            ord.then_with(|| a.id.cmp(&b.id))
        });

        let total = rows.len() as i64;
        let items = rows
            .into_iter()
            .skip(query.offset() as usize)
            .take(query.page_size() as usize)
            .collect();

        Ok(SubscriptionPage {
            items,
            total,
            page: query.page(),
            page_size: query.page_size(),
        })
    }

    async fn insert(&self, sub: &Subscription) -> Result<Subscription, sqlx::Error> {
        self.check()?;
        let mut rows = self.rows.lock().unwrap();
        if let Some(stripe_id) = sub.stripe_subscription_id.as_deref() {
            if rows
                .iter()
                .any(|s| s.stripe_subscription_id.as_deref() == Some(stripe_id))
            {
                return Err(sqlx::Error::Protocol(format!(
                    "duplicate stripe_subscription_id {stripe_id}"
                )));
            }
        }
        let now = OffsetDateTime::now_utc();
        let mut row = sub.clone();
        row.created_at = now;
        row.updated_at = now;
        rows.push(row.clone());
        drop(rows);
        self.bump_writes();
        Ok(row)
    }

    async fn update(&self, sub: &Subscription) -> Result<Subscription, sqlx::Error> {
        self.check()?;
        let mut rows = self.rows.lock().unwrap();
        let existing = rows
            .iter_mut()
            .find(|s| s.id == sub.id)
            .ok_or(sqlx::Error::RowNotFound)?;
        let created_at = existing.created_at;
        let user_id = existing.user_id;
        *existing = sub.clone();
        existing.user_id = user_id;
        existing.created_at = created_at;
        existing.updated_at = OffsetDateTime::now_utc();
        let row = existing.clone();
        drop(rows);
        self.bump_writes();
        Ok(row)
    }

    async fn upsert_by_stripe_id(&self, sub: &Subscription) -> Result<Subscription, sqlx::Error> {
        let Some(stripe_id) = sub.stripe_subscription_id.as_deref() else {
            return self.insert(sub).await;
        };
        match self.find_by_stripe_subscription_id(stripe_id).await? {
            Some(existing) => {
                let mut merged = sub.clone();
                merged.id = existing.id;
                merged.user_id = existing.user_id;
                merged.pause_reason = existing.pause_reason;
                merged.cancel_reason = existing.cancel_reason;
                self.update(&merged).await
            }
            None => self.insert(sub).await,
        }
    }

    async fn delete(&self, id: Uuid) -> Result<bool, sqlx::Error> {
        self.check()?;
        let mut rows = self.rows.lock().unwrap();
        let before = rows.len();
        rows.retain(|s| s.id != id);
        Ok(rows.len() != before)
    }
}

#[derive(Clone, Default)]
pub struct InMemoryPlanRepository {
    plans: Arc<Mutex<Vec<Plan>>>,
}

impl InMemoryPlanRepository {
    pub fn with_plans(plans: Vec<Plan>) -> Self {
        Self {
            plans: Arc::new(Mutex::new(plans)),
        }
    }
}

#[async_trait]
impl PlanRepository for InMemoryPlanRepository {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Plan>, sqlx::Error> {
        Ok(self
            .plans
            .lock()
            .unwrap()
            .iter()
            .find(|p| p.id == id)
            .cloned())
    }

    async fn find_by_stripe_price_id(&self, price_id: &str) -> Result<Option<Plan>, sqlx::Error> {
        Ok(self
            .plans
            .lock()
            .unwrap()
            .iter()
            .find(|p| p.stripe_price_id.as_deref() == Some(price_id))
            .cloned())
    }

    async fn find_by_stripe_product_id(
        &self,
        product_id: &str,
    ) -> Result<Option<Plan>, sqlx::Error> {
        Ok(self
            .plans
            .lock()
            .unwrap()
            .iter()
            .find(|p| p.stripe_product_id.as_deref() == Some(product_id))
            .cloned())
    }

    async fn list_active(&self) -> Result<Vec<Plan>, sqlx::Error> {
        let mut plans: Vec<Plan> = self
            .plans
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.active)
            .cloned()
            .collect();
        plans.sort_by(|a, b| a.amount.cmp(&b.amount).then_with(|| a.name.cmp(&b.name)));
        Ok(plans)
    }
}

#[derive(Clone, Default)]
pub struct InMemoryBillingCustomerRepository {
    customers: Arc<Mutex<HashMap<Uuid, BillingCustomer>>>,
}

impl InMemoryBillingCustomerRepository {
    pub fn get(&self, user_id: Uuid) -> Option<BillingCustomer> {
        self.customers.lock().unwrap().get(&user_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.customers.lock().unwrap().len()
    }
}

#[async_trait]
impl BillingCustomerRepository for InMemoryBillingCustomerRepository {
    async fn find_by_user_id(&self, user_id: Uuid) -> Result<Option<BillingCustomer>, sqlx::Error> {
        Ok(self.get(user_id))
    }

    async fn find_by_stripe_customer_id(
        &self,
        stripe_customer_id: &str,
    ) -> Result<Option<BillingCustomer>, sqlx::Error> {
        Ok(self
            .customers
            .lock()
            .unwrap()
            .values()
            .find(|c| c.stripe_customer_id == stripe_customer_id)
            .cloned())
    }

    async fn insert(
        &self,
        user_id: Uuid,
        stripe_customer_id: &str,
        email: Option<&str>,
        metadata: Value,
    ) -> Result<BillingCustomer, sqlx::Error> {
        let mut customers = self.customers.lock().unwrap();
        if customers.contains_key(&user_id)
            || customers
                .values()
                .any(|c| c.stripe_customer_id == stripe_customer_id)
        {
            return Err(sqlx::Error::Protocol("duplicate billing customer".into()));
        }
        let now = OffsetDateTime::now_utc();
        let customer = BillingCustomer {
            id: Uuid::new_v4(),
            user_id,
            stripe_customer_id: stripe_customer_id.to_string(),
            email: email.map(str::to_string),
            metadata,
            created_at: now,
            updated_at: now,
        };
        customers.insert(user_id, customer.clone());
        Ok(customer)
    }

    async fn update_email(
        &self,
        user_id: Uuid,
        email: &str,
    ) -> Result<BillingCustomer, sqlx::Error> {
        let mut customers = self.customers.lock().unwrap();
        let customer = customers
            .get_mut(&user_id)
            .ok_or(sqlx::Error::RowNotFound)?;
        customer.email = Some(email.to_string());
        customer.updated_at = OffsetDateTime::now_utc();
        Ok(customer.clone())
    }

    async fn update_metadata(
        &self,
        user_id: Uuid,
        metadata: Value,
    ) -> Result<BillingCustomer, sqlx::Error> {
        let mut customers = self.customers.lock().unwrap();
        let customer = customers
            .get_mut(&user_id)
            .ok_or(sqlx::Error::RowNotFound)?;
        customer.metadata = metadata;
        customer.updated_at = OffsetDateTime::now_utc();
        Ok(customer.clone())
    }

    async fn delete(&self, user_id: Uuid) -> Result<bool, sqlx::Error> {
        Ok(self.customers.lock().unwrap().remove(&user_id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::subscription::SubscriptionStatus;

    #[tokio::test]
    async fn upsert_by_stripe_id_keeps_a_single_row() {
        let repo = InMemorySubscriptionRepository::new();
        let mut sub = Subscription::new_local(Uuid::new_v4(), "Collector", OffsetDateTime::now_utc());
        sub.stripe_subscription_id = Some("sub_1".into());
        repo.upsert_by_stripe_id(&sub).await.unwrap();

        let mut again = sub.clone();
        again.id = Uuid::new_v4();
        again.status = SubscriptionStatus::PastDue;
        let stored = repo.upsert_by_stripe_id(&again).await.unwrap();

        assert_eq!(repo.all().len(), 1);
        assert_eq!(stored.id, sub.id);
        assert_eq!(stored.status, SubscriptionStatus::PastDue);
    }

    #[tokio::test]
    async fn search_filters_and_pages() {
        let user = Uuid::new_v4();
        let now = OffsetDateTime::now_utc();
        let rows = (0..5)
            .map(|i| {
                let mut s = Subscription::new_local(user, &format!("Plan {i}"), now);
                if i % 2 == 0 {
                    s.status = SubscriptionStatus::Canceled;
                }
                s
            })
            .collect();
        let repo = InMemorySubscriptionRepository::with_rows(rows);

        let page = repo
            .search(&SubscriptionQuery {
                status: Some(SubscriptionStatus::Canceled),
                page_size: Some(2),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.items.len(), 2);
    }
}
