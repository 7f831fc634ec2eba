//! Stored filter persistence: save, lookup, delete and visibility listing.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use duckdb::{params, params_from_iter, Connection, Row};
use uuid::Uuid;

use super::Store;
use crate::record::{can_edit, Actor, StoredFilter};
use crate::{Error, Result};

const SELECT_FILTER: &str = "SELECT id, title, owner, model, encoded_query, epoch_us(created_at) \
     FROM advanced_filters";

/// Raw `advanced_filters` row as read from DuckDB.
type RawFilter = (String, String, String, Option<String>, String, i64);

fn read_row(row: &Row<'_>) -> duckdb::Result<RawFilter> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn to_filter(raw: RawFilter) -> Result<StoredFilter> {
    let (id, title, owner, model, encoded_query, created_us) = raw;
    Ok(StoredFilter {
        id: Uuid::parse_str(&id)
            .map_err(|e| Error::Storage(format!("invalid filter id '{}': {}", id, e)))?,
        title,
        owner,
        shared_users: BTreeSet::new(),
        shared_groups: BTreeSet::new(),
        model,
        encoded_query,
        created_at: DateTime::from_timestamp_micros(created_us).ok_or_else(|| {
            Error::Storage(format!("invalid created_at for filter {}", id))
        })?,
    })
}

/// Timestamps are stored with microsecond precision.
fn truncate_to_micros(dt: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_micros(dt.timestamp_micros()).unwrap_or(dt)
}

fn load_shares(conn: &Connection, filter: &mut StoredFilter) -> Result<()> {
    let id = filter.id.to_string();

    let mut stmt =
        conn.prepare("SELECT username FROM advanced_filter_users WHERE filter_id = ?")?;
    filter.shared_users = stmt
        .query_map(params![id], |row| row.get(0))?
        .collect::<std::result::Result<BTreeSet<String>, _>>()?;

    let mut stmt =
        conn.prepare("SELECT group_name FROM advanced_filter_groups WHERE filter_id = ?")?;
    filter.shared_groups = stmt
        .query_map(params![id], |row| row.get(0))?
        .collect::<std::result::Result<BTreeSet<String>, _>>()?;

    Ok(())
}

fn write_shares(conn: &Connection, filter: &StoredFilter) -> Result<()> {
    let id = filter.id.to_string();

    conn.execute(
        "DELETE FROM advanced_filter_users WHERE filter_id = ?",
        params![id],
    )?;
    for username in &filter.shared_users {
        conn.execute(
            "INSERT INTO advanced_filter_users VALUES (?, ?)",
            params![id, username],
        )?;
    }

    conn.execute(
        "DELETE FROM advanced_filter_groups WHERE filter_id = ?",
        params![id],
    )?;
    for group in &filter.shared_groups {
        conn.execute(
            "INSERT INTO advanced_filter_groups VALUES (?, ?)",
            params![id, group],
        )?;
    }

    Ok(())
}

fn fetch_filter(conn: &Connection, id: Uuid) -> Result<Option<StoredFilter>> {
    let mut stmt = conn.prepare(&format!("{} WHERE id = ?", SELECT_FILTER))?;
    let mut rows = stmt.query_map(params![id.to_string()], read_row)?;

    match rows.next() {
        Some(raw) => {
            let mut filter = to_filter(raw?)?;
            load_shares(conn, &mut filter)?;
            Ok(Some(filter))
        }
        None => Ok(None),
    }
}

impl Store {
    /// Create or update a filter on behalf of `actor`.
    ///
    /// A new filter is owned by `actor`. An existing one keeps its owner and
    /// creation time and may only be changed by someone allowed to edit it.
    /// The row and its share lists are written in one transaction; concurrent
    /// saves resolve as last write wins.
    pub fn save(&self, actor: &Actor, filter: &StoredFilter) -> Result<StoredFilter> {
        if !filter.encoded_query.trim().is_empty() {
            self.codec().decode(&filter.encoded_query)?;
        }

        let saved = self.in_transaction(|conn| {
            let saved = match fetch_filter(conn, filter.id)? {
                Some(existing) => {
                    if !can_edit(actor, &existing, &self.config) {
                        return Err(Error::PermissionDenied(format!(
                            "{} may not edit filter '{}'",
                            actor.username, existing.title
                        )));
                    }
                    let saved = StoredFilter {
                        owner: existing.owner,
                        created_at: existing.created_at,
                        ..filter.clone()
                    };
                    conn.execute(
                        "UPDATE advanced_filters SET title = ?, model = ?, encoded_query = ? WHERE id = ?",
                        params![
                            saved.title,
                            saved.model,
                            saved.encoded_query,
                            saved.id.to_string(),
                        ],
                    )?;
                    saved
                }
                None => {
                    let saved = StoredFilter {
                        owner: actor.username.clone(),
                        created_at: truncate_to_micros(filter.created_at),
                        ..filter.clone()
                    };
                    conn.execute(
                        "INSERT INTO advanced_filters VALUES (?, ?, ?, ?, ?, make_timestamp(?))",
                        params![
                            saved.id.to_string(),
                            saved.title,
                            saved.owner,
                            saved.model,
                            saved.encoded_query,
                            saved.created_at.timestamp_micros(),
                        ],
                    )?;
                    saved
                }
            };

            write_shares(conn, &saved)?;
            Ok(saved)
        })?;

        tracing::debug!(id = %saved.id, owner = %saved.owner, title = %saved.title, "Saved filter");
        Ok(saved)
    }

    /// Look up a filter by id.
    pub fn get(&self, id: Uuid) -> Result<Option<StoredFilter>> {
        let conn = self.connection()?;
        fetch_filter(&conn, id)
    }

    /// Delete a filter on behalf of `actor`.
    pub fn delete(&self, actor: &Actor, id: Uuid) -> Result<()> {
        self.in_transaction(|conn| {
            let existing = fetch_filter(conn, id)?
                .ok_or_else(|| Error::NotFound(format!("filter {}", id)))?;

            if !can_edit(actor, &existing, &self.config) {
                return Err(Error::PermissionDenied(format!(
                    "{} may not delete filter '{}'",
                    actor.username, existing.title
                )));
            }

            let id = id.to_string();
            conn.execute(
                "DELETE FROM advanced_filter_users WHERE filter_id = ?",
                params![id],
            )?;
            conn.execute(
                "DELETE FROM advanced_filter_groups WHERE filter_id = ?",
                params![id],
            )?;
            conn.execute("DELETE FROM advanced_filters WHERE id = ?", params![id])?;
            Ok(())
        })?;

        tracing::debug!(id = %id, actor = %actor.username, "Deleted filter");
        Ok(())
    }

    /// Count stored filters.
    pub fn count(&self) -> Result<i64> {
        let conn = self.connection()?;
        let count = conn.query_row("SELECT COUNT(*) FROM advanced_filters", [], |row| {
            row.get(0)
        })?;
        Ok(count)
    }

    /// Filters owned by `actor` or shared with them directly or through one
    /// of their groups, each listed once, oldest first.
    pub fn list_visible(&self, actor: &Actor) -> Result<Vec<StoredFilter>> {
        self.list_visible_inner(actor, None)
    }

    /// Like `list_visible`, restricted to filters bound to `model`.
    pub fn list_visible_for_model(&self, actor: &Actor, model: &str) -> Result<Vec<StoredFilter>> {
        self.list_visible_inner(actor, Some(model))
    }

    fn list_visible_inner(&self, actor: &Actor, model: Option<&str>) -> Result<Vec<StoredFilter>> {
        let mut sql = format!(
            "{} WHERE (owner = ? OR id IN (SELECT filter_id FROM advanced_filter_users WHERE username = ?",
            SELECT_FILTER
        );
        let mut args = vec![actor.username.clone(), actor.username.clone()];

        if !actor.groups.is_empty() {
            let placeholders = vec!["?"; actor.groups.len()].join(", ");
            sql.push_str(&format!(
                " UNION SELECT filter_id FROM advanced_filter_groups WHERE group_name IN ({})",
                placeholders
            ));
            args.extend(actor.groups.iter().cloned());
        }
        sql.push_str("))");

        if let Some(model) = model {
            sql.push_str(" AND model = ?");
            args.push(model.to_string());
        }
        sql.push_str(" ORDER BY created_at, id");

        let conn = self.connection()?;
        let mut stmt = conn.prepare(&sql)?;
        let raw = stmt
            .query_map(params_from_iter(args.iter()), read_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        raw.into_iter()
            .map(|raw| {
                let mut filter = to_filter(raw)?;
                load_shares(&conn, &mut filter)?;
                Ok(filter)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::init::initialize;
    use crate::query::{Group, Leaf, Operator, QueryCodec};
    use crate::Config;
    use chrono::TimeDelta;
    use tempfile::TempDir;

    fn setup_store() -> (TempDir, Store) {
        let tmp = TempDir::new().unwrap();
        let config = Config::with_root(tmp.path());
        initialize(&config).unwrap();
        let store = Store::open(config).unwrap();
        (tmp, store)
    }

    fn sample_filter(title: &str) -> StoredFilter {
        let mut filter = StoredFilter::new(title, "ignored").with_model("SalesRep");
        filter
            .set_query(
                &QueryCodec::base64(),
                &Group::and(vec![Leaf::new("first_name", Operator::EqualsCi, "john").into()]),
            )
            .unwrap();
        filter
    }

    #[test]
    fn test_save_new_filter_sets_owner() {
        let (_tmp, store) = setup_store();
        let alice = Actor::new("alice");

        let saved = store
            .save(&alice, &sample_filter("Johns").shared_with_users(["bob"]))
            .unwrap();
        assert_eq!(saved.owner, "alice");
        assert_eq!(store.count().unwrap(), 1);

        let loaded = store.get(saved.id).unwrap().unwrap();
        assert_eq!(loaded, saved);
        assert_eq!(
            loaded.query(&store.codec()).unwrap().unwrap().leaf_count(),
            1
        );
    }

    #[test]
    fn test_get_missing_filter() {
        let (_tmp, store) = setup_store();
        assert!(store.get(Uuid::now_v7()).unwrap().is_none());
    }

    #[test]
    fn test_update_keeps_owner() {
        let (_tmp, store) = setup_store();
        let alice = Actor::new("alice");
        let root = Actor::new("root").superuser();

        let saved = store.save(&alice, &sample_filter("Johns")).unwrap();

        let mut changed = saved.clone();
        changed.title = "All Johns".to_string();
        changed.owner = "root".to_string();
        changed.shared_groups = ["sales".to_string()].into();
        let updated = store.save(&root, &changed).unwrap();

        assert_eq!(updated.owner, "alice");
        assert_eq!(updated.created_at, saved.created_at);
        assert_eq!(store.count().unwrap(), 1);

        let loaded = store.get(saved.id).unwrap().unwrap();
        assert_eq!(loaded.title, "All Johns");
        assert_eq!(loaded.owner, "alice");
        assert!(loaded.shared_groups.contains("sales"));
    }

    #[test]
    fn test_update_by_non_owner_denied() {
        let (_tmp, store) = setup_store();
        let saved = store
            .save(&Actor::new("alice"), &sample_filter("Johns").shared_with_users(["bob"]))
            .unwrap();

        let mut changed = saved.clone();
        changed.title = "Hijacked".to_string();
        let result = store.save(&Actor::new("bob"), &changed);
        assert!(matches!(result, Err(Error::PermissionDenied(_))));
        assert_eq!(store.get(saved.id).unwrap().unwrap().title, "Johns");
    }

    #[test]
    fn test_relaxed_config_lets_anyone_edit() {
        let tmp = TempDir::new().unwrap();
        let config = Config {
            edit_by_user_only: false,
            ..Config::with_root(tmp.path())
        };
        initialize(&config).unwrap();
        let store = Store::open(config).unwrap();

        let saved = store.save(&Actor::new("alice"), &sample_filter("Johns")).unwrap();
        let carol = Actor::new("carol");
        assert!(store.list_visible(&carol).unwrap().is_empty());

        let mut changed = saved.clone();
        changed.title = "Carol's Johns".to_string();
        let updated = store.save(&carol, &changed).unwrap();
        assert_eq!(updated.owner, "alice");
        assert_eq!(store.get(saved.id).unwrap().unwrap().title, "Carol's Johns");

        store.delete(&carol, saved.id).unwrap();
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn test_save_rejects_undecodable_query() {
        let (_tmp, store) = setup_store();
        let mut filter = sample_filter("Broken");
        filter.encoded_query = "%%%".to_string();

        let result = store.save(&Actor::new("alice"), &filter);
        assert!(matches!(result, Err(Error::Decode(_))));
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn test_delete() {
        let (_tmp, store) = setup_store();
        let alice = Actor::new("alice");
        let saved = store
            .save(&alice, &sample_filter("Johns").shared_with_users(["bob"]))
            .unwrap();

        let denied = store.delete(&Actor::new("bob"), saved.id);
        assert!(matches!(denied, Err(Error::PermissionDenied(_))));

        store.delete(&alice, saved.id).unwrap();
        assert_eq!(store.count().unwrap(), 0);
        assert!(store.list_visible(&Actor::new("bob")).unwrap().is_empty());

        let missing = store.delete(&alice, saved.id);
        assert!(matches!(missing, Err(Error::NotFound(_))));
    }

    #[test]
    fn test_list_visible_dedups_and_orders() {
        let (_tmp, store) = setup_store();
        let alice = Actor::new("alice");
        let base = Utc::now();

        let mut newer = sample_filter("Newer")
            .shared_with_users(["bob"])
            .shared_with_groups(["sales"]);
        newer.created_at = base + TimeDelta::seconds(10);
        let mut older = sample_filter("Older").shared_with_groups(["sales", "support"]);
        older.created_at = base;
        let private = sample_filter("Private");

        store.save(&alice, &newer).unwrap();
        store.save(&alice, &older).unwrap();
        store.save(&alice, &private).unwrap();

        let bob = Actor::new("bob").with_groups(["sales", "support"]);
        let titles: Vec<String> = store
            .list_visible(&bob)
            .unwrap()
            .into_iter()
            .map(|f| f.title)
            .collect();
        assert_eq!(titles, vec!["Older", "Newer"]);

        // The owner sees private filters too
        assert_eq!(store.list_visible(&alice).unwrap().len(), 3);
    }

    #[test]
    fn test_list_visible_through_group_only() {
        let (_tmp, store) = setup_store();
        store
            .save(
                &Actor::new("alice"),
                &sample_filter("Team").shared_with_groups(["sales"]),
            )
            .unwrap();

        let carol = Actor::new("carol").with_groups(["sales"]);
        let visible = store.list_visible(&carol).unwrap();
        assert_eq!(visible.len(), 1);
        assert!(visible[0].shared_users.is_empty());

        assert!(store.list_visible(&Actor::new("dave")).unwrap().is_empty());
    }

    #[test]
    fn test_list_visible_for_model() {
        let (_tmp, store) = setup_store();
        let alice = Actor::new("alice");
        store
            .save(&alice, &sample_filter("Reps").shared_with_users(["bob"]))
            .unwrap();
        let mut other = sample_filter("Groups").shared_with_users(["bob"]);
        other.model = Some("Group".to_string());
        store.save(&alice, &other).unwrap();

        let bob = Actor::new("bob");
        assert_eq!(store.list_visible(&bob).unwrap().len(), 2);

        let reps = store.list_visible_for_model(&bob, "SalesRep").unwrap();
        assert_eq!(reps.len(), 1);
        assert_eq!(reps[0].title, "Reps");
    }
}
