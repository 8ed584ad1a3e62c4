use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{Connection, OptionalExtension, Row};
use uuid::Uuid;

use super::Store;

#[derive(Debug, Clone, PartialEq)]
pub struct Invoice {
    pub id: String,
    pub user_id: String,
    pub vendor: Option<String>,
    pub amount: Option<f64>,
    pub due_date: Option<NaiveDate>,
    pub attachment_url: Option<String>,
    /// Uploaded, but the sender has not told us the due date yet
    pub awaiting_due: bool,
    pub reminder_sent: bool,
    /// Settled by the sender; no longer outstanding or reminded
    pub paid: bool,
    pub created_at: DateTime<Utc>,
}

impl Invoice {
    /// A freshly uploaded invoice with no known due date
    pub fn pending(user_id: &str, attachment_url: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            vendor: None,
            amount: None,
            due_date: None,
            attachment_url: Some(attachment_url.to_string()),
            awaiting_due: true,
            reminder_sent: false,
            paid: false,
            created_at: Utc::now(),
        }
    }

    /// "from Acme", or "uploaded" when the vendor is unknown
    pub fn label(&self) -> String {
        match &self.vendor {
            Some(v) => format!("from {}", v),
            None => "uploaded".to_string(),
        }
    }
}

const COLUMNS: &str = "id, user_id, vendor, amount, due_date, attachment_url,
                       awaiting_due, reminder_sent, paid, created_at";

const DATE_FORMAT: &str = "%Y-%m-%d";

fn row_to_invoice(row: &Row<'_>) -> rusqlite::Result<Invoice> {
    let due_date: Option<String> = row.get(4)?;
    let created_at: String = row.get(9)?;
    Ok(Invoice {
        id: row.get(0)?,
        user_id: row.get(1)?,
        vendor: row.get(2)?,
        amount: row.get(3)?,
        due_date: due_date.and_then(|d| NaiveDate::parse_from_str(&d, DATE_FORMAT).ok()),
        attachment_url: row.get(5)?,
        awaiting_due: row.get(6)?,
        reminder_sent: row.get(7)?,
        paid: row.get(8)?,
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(9, rusqlite::types::Type::Text, Box::new(e))
            })?,
    })
}

impl Store {
    pub async fn save_invoice(&self, invoice: &Invoice) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO invoices
             (id, user_id, vendor, amount, due_date, attachment_url,
              awaiting_due, reminder_sent, paid, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            rusqlite::params![
                invoice.id,
                invoice.user_id,
                invoice.vendor,
                invoice.amount,
                invoice.due_date.map(|d| d.format(DATE_FORMAT).to_string()),
                invoice.attachment_url,
                invoice.awaiting_due,
                invoice.reminder_sent,
                invoice.paid,
                invoice.created_at.to_rfc3339(),
            ],
        )
        .context("Failed to insert invoice")?;
        Ok(())
    }

    /// Fill in the due date (and amount, when given) on the user's oldest
    /// invoice still awaiting one. Returns the updated invoice, or None when
    /// nothing was pending.
    pub async fn set_due_date_for_pending(
        &self,
        user_id: &str,
        due_date: NaiveDate,
        amount: Option<f64>,
    ) -> Result<Option<Invoice>> {
        let conn = self.conn.lock().await;
        let pending = query_invoices(
            &conn,
            "WHERE user_id = ?1 AND awaiting_due = 1 ORDER BY created_at ASC LIMIT 1",
            rusqlite::params![user_id],
        )?;
        let Some(mut invoice) = pending.into_iter().next() else {
            return Ok(None);
        };

        conn.execute(
            "UPDATE invoices
             SET due_date = ?1, amount = COALESCE(?2, amount), awaiting_due = 0
             WHERE id = ?3",
            rusqlite::params![
                due_date.format(DATE_FORMAT).to_string(),
                amount,
                invoice.id
            ],
        )
        .context("Failed to set due date")?;

        invoice.due_date = Some(due_date);
        invoice.awaiting_due = false;
        if amount.is_some() {
            invoice.amount = amount;
        }
        Ok(Some(invoice))
    }

    pub async fn pending_for_user(&self, user_id: &str) -> Result<Vec<Invoice>> {
        let conn = self.conn.lock().await;
        query_invoices(
            &conn,
            "WHERE user_id = ?1 AND awaiting_due = 1 ORDER BY created_at ASC",
            rusqlite::params![user_id],
        )
    }

    /// Unpaid dated invoices for one user that fall due on or before
    /// `until` (overdue ones included), soonest first.
    pub async fn upcoming_for_user(&self, user_id: &str, until: NaiveDate) -> Result<Vec<Invoice>> {
        let conn = self.conn.lock().await;
        query_invoices(
            &conn,
            "WHERE user_id = ?1 AND awaiting_due = 0 AND paid = 0
               AND due_date IS NOT NULL AND due_date <= ?2
             ORDER BY due_date ASC",
            rusqlite::params![user_id, until.format(DATE_FORMAT).to_string()],
        )
    }

    /// Every unpaid dated invoice of a user, soonest first
    pub async fn dated_for_user(&self, user_id: &str) -> Result<Vec<Invoice>> {
        let conn = self.conn.lock().await;
        query_invoices(
            &conn,
            "WHERE user_id = ?1 AND paid = 0 AND due_date IS NOT NULL
             ORDER BY due_date ASC",
            rusqlite::params![user_id],
        )
    }

    /// Invoices across all users that need a reminder by `until`
    pub async fn due_for_reminder(&self, until: NaiveDate) -> Result<Vec<Invoice>> {
        let conn = self.conn.lock().await;
        query_invoices(
            &conn,
            "WHERE reminder_sent = 0 AND awaiting_due = 0 AND paid = 0
               AND due_date IS NOT NULL AND due_date <= ?1
             ORDER BY due_date ASC",
            rusqlite::params![until.format(DATE_FORMAT).to_string()],
        )
    }

    pub async fn mark_reminder_sent(&self, id: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE invoices SET reminder_sent = 1 WHERE id = ?1",
            rusqlite::params![id],
        )
        .context("Failed to mark reminder sent")?;
        Ok(())
    }

    /// Settle every unpaid invoice of `user_id` due on `due_date`.
    /// Returns how many were marked.
    pub async fn mark_paid(&self, user_id: &str, due_date: NaiveDate) -> Result<usize> {
        let conn = self.conn.lock().await;
        let updated = conn
            .execute(
                "UPDATE invoices SET paid = 1
                 WHERE user_id = ?1 AND due_date = ?2 AND awaiting_due = 0 AND paid = 0",
                rusqlite::params![user_id, due_date.format(DATE_FORMAT).to_string()],
            )
            .context("Failed to mark invoice paid")?;
        Ok(updated)
    }

    #[allow(dead_code)]
    pub async fn get_invoice(&self, id: &str) -> Result<Option<Invoice>> {
        let conn = self.conn.lock().await;
        conn.query_row(
            &format!("SELECT {} FROM invoices WHERE id = ?1", COLUMNS),
            rusqlite::params![id],
            row_to_invoice,
        )
        .optional()
        .context("Failed to query invoice by id")
    }
}

// Takes &Connection directly (caller already holds the lock).
fn query_invoices(
    conn: &Connection,
    clause: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<Invoice>> {
    let sql = format!("SELECT {} FROM invoices {}", COLUMNS, clause);
    let mut stmt = conn.prepare(&sql).context("Failed to prepare query")?;
    let invoices = stmt
        .query_map(params, row_to_invoice)
        .context("Failed to map rows")?
        .collect::<rusqlite::Result<Vec<_>>>()
        .context("Failed to collect rows")?;
    Ok(invoices)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, DATE_FORMAT).unwrap()
    }

    fn dated(user_id: &str, vendor: &str, due: &str) -> Invoice {
        Invoice {
            vendor: Some(vendor.to_string()),
            amount: Some(100.0),
            due_date: Some(date(due)),
            awaiting_due: false,
            ..Invoice::pending(user_id, "https://media.example/x")
        }
    }

    #[tokio::test]
    async fn test_save_and_get() {
        let store = Store::open_in_memory().unwrap();
        let invoice = dated("user-1", "Acme", "2026-08-15");
        store.save_invoice(&invoice).await.unwrap();

        let loaded = store.get_invoice(&invoice.id).await.unwrap().unwrap();
        assert_eq!(loaded.vendor.as_deref(), Some("Acme"));
        assert_eq!(loaded.due_date, Some(date("2026-08-15")));
        assert!(!loaded.reminder_sent);
        assert!(store.get_invoice("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_due_date_goes_to_oldest_pending() {
        let store = Store::open_in_memory().unwrap();
        let mut first = Invoice::pending("user-1", "https://media.example/1");
        first.created_at = Utc::now() - Duration::minutes(5);
        let second = Invoice::pending("user-1", "https://media.example/2");
        store.save_invoice(&second).await.unwrap();
        store.save_invoice(&first).await.unwrap();

        let updated = store
            .set_due_date_for_pending("user-1", date("2026-09-01"), Some(250.0))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.id, first.id);
        assert_eq!(updated.amount, Some(250.0));
        assert!(!updated.awaiting_due);

        let pending = store.pending_for_user("user-1").await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, second.id);
    }

    #[tokio::test]
    async fn test_set_due_date_without_pending() {
        let store = Store::open_in_memory().unwrap();
        let result = store
            .set_due_date_for_pending("nobody", date("2026-09-01"), None)
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_due_for_reminder_filters() {
        let store = Store::open_in_memory().unwrap();
        store
            .save_invoice(&dated("a", "Soon", "2026-08-02"))
            .await
            .unwrap();
        store
            .save_invoice(&dated("b", "Overdue", "2026-07-20"))
            .await
            .unwrap();
        store
            .save_invoice(&dated("a", "Later", "2026-09-30"))
            .await
            .unwrap();
        let reminded = dated("a", "Done", "2026-08-01");
        store.save_invoice(&reminded).await.unwrap();
        store.mark_reminder_sent(&reminded.id).await.unwrap();
        store
            .save_invoice(&Invoice::pending("a", "https://media.example/p"))
            .await
            .unwrap();

        let due = store.due_for_reminder(date("2026-08-03")).await.unwrap();
        let vendors: Vec<_> = due.iter().filter_map(|i| i.vendor.as_deref()).collect();
        assert_eq!(vendors, vec!["Overdue", "Soon"]);
    }

    #[tokio::test]
    async fn test_upcoming_is_per_user() {
        let store = Store::open_in_memory().unwrap();
        store
            .save_invoice(&dated("a", "Mine", "2026-08-02"))
            .await
            .unwrap();
        store
            .save_invoice(&dated("b", "Theirs", "2026-08-02"))
            .await
            .unwrap();

        let upcoming = store
            .upcoming_for_user("a", date("2026-08-10"))
            .await
            .unwrap();
        assert_eq!(upcoming.len(), 1);
        assert_eq!(upcoming[0].vendor.as_deref(), Some("Mine"));
        assert_eq!(store.dated_for_user("b").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_paid_invoices_drop_out() {
        let store = Store::open_in_memory().unwrap();
        let settled = dated("a", "Settled", "2026-08-02");
        let open = dated("a", "Open", "2026-08-05");
        let other_user = dated("b", "Theirs", "2026-08-02");
        for invoice in [&settled, &open, &other_user] {
            store.save_invoice(invoice).await.unwrap();
        }

        let marked = store.mark_paid("a", date("2026-08-02")).await.unwrap();
        assert_eq!(marked, 1);
        assert!(store.get_invoice(&settled.id).await.unwrap().unwrap().paid);

        let vendors = |invoices: Vec<Invoice>| -> Vec<String> {
            invoices.into_iter().filter_map(|i| i.vendor).collect()
        };
        let until = date("2026-08-10");
        assert_eq!(
            vendors(store.upcoming_for_user("a", until).await.unwrap()),
            vec!["Open"]
        );
        assert_eq!(vendors(store.dated_for_user("a").await.unwrap()), vec!["Open"]);
        assert_eq!(
            vendors(store.due_for_reminder(until).await.unwrap()),
            vec!["Theirs", "Open"]
        );

        // Already settled: nothing left to mark
        assert_eq!(store.mark_paid("a", date("2026-08-02")).await.unwrap(), 0);
    }
}
