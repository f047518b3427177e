use std::str::FromStr;

use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use super::{format_timestamp, parse_timestamp, parse_uuid};
use crate::db::DatabaseError;
use crate::models::enums::Role;
use crate::models::User;

const USER_COLUMNS: &str = "id, name, email, password_hash, role, created_at";

type UserRow = (String, String, String, String, String, String);

fn read_user_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn user_from_row(raw: UserRow) -> Result<User, DatabaseError> {
    let (id, name, email, password_hash, role, created_at) = raw;
    Ok(User {
        id: parse_uuid(&id)?,
        name,
        email,
        password_hash,
        role: Role::from_str(&role)?,
        created_at: parse_timestamp(&created_at)?,
    })
}

pub fn insert_user(conn: &Connection, user: &User) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO users (id, name, email, password_hash, role, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            user.id.to_string(),
            user.name,
            user.email,
            user.password_hash,
            user.role.as_str(),
            format_timestamp(&user.created_at),
        ],
    )?;
    Ok(())
}

pub fn get_user(conn: &Connection, id: &Uuid) -> Result<Option<User>, DatabaseError> {
    let raw = conn
        .query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
            params![id.to_string()],
            read_user_row,
        )
        .optional()?;
    raw.map(user_from_row).transpose()
}

/// Email comparison is case-insensitive (column collation).
pub fn get_user_by_email(conn: &Connection, email: &str) -> Result<Option<User>, DatabaseError> {
    let raw = conn
        .query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?1"),
            params![email],
            read_user_row,
        )
        .optional()?;
    raw.map(user_from_row).transpose()
}

pub fn list_users(conn: &Connection) -> Result<Vec<User>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {USER_COLUMNS} FROM users ORDER BY created_at DESC"
    ))?;
    let rows = stmt.query_map([], read_user_row)?;

    let mut users = Vec::new();
    for row in rows {
        users.push(user_from_row(row?)?);
    }
    Ok(users)
}

/// Hard delete. Appointments owned by the user cascade; linked doctor
/// records are unlinked. Returns `false` if no row matched.
pub fn delete_user(conn: &Connection, id: &Uuid) -> Result<bool, DatabaseError> {
    let deleted = conn.execute("DELETE FROM users WHERE id = ?1", params![id.to_string()])?;
    Ok(deleted > 0)
}

pub fn count_users_by_role(conn: &Connection, role: Role) -> Result<i64, DatabaseError> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM users WHERE role = ?1",
        params![role.as_str()],
        |row| row.get(0),
    )?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::sqlite::open_memory_database;

    fn make_user(name: &str, email: &str, role: Role) -> User {
        User {
            id: Uuid::new_v4(),
            name: name.into(),
            email: email.into(),
            password_hash: "hash".into(),
            role,
            created_at: chrono::Utc::now().naive_utc(),
        }
    }

    #[test]
    fn user_insert_and_lookup_by_email_ignores_case() {
        let conn = open_memory_database().unwrap();
        let user = make_user("Ana", "ana@example.com", Role::Patient);
        insert_user(&conn, &user).unwrap();

        let found = get_user_by_email(&conn, "ANA@example.com").unwrap().unwrap();
        assert_eq!(found.id, user.id);
        assert_eq!(found.role, Role::Patient);
        assert_eq!(found.password_hash, "hash");
    }

    #[test]
    fn duplicate_email_is_unique_violation() {
        let conn = open_memory_database().unwrap();
        insert_user(&conn, &make_user("Ana", "ana@example.com", Role::Patient)).unwrap();
        let err = insert_user(&conn, &make_user("Other", "Ana@Example.com", Role::Doctor))
            .unwrap_err();
        assert!(err.is_unique_violation());
    }

    #[test]
    fn delete_user_reports_missing_row() {
        let conn = open_memory_database().unwrap();
        let user = make_user("Ana", "ana@example.com", Role::Patient);
        insert_user(&conn, &user).unwrap();

        assert!(delete_user(&conn, &user.id).unwrap());
        assert!(!delete_user(&conn, &user.id).unwrap());
        assert!(get_user(&conn, &user.id).unwrap().is_none());
    }

    #[test]
    fn role_counts() {
        let conn = open_memory_database().unwrap();
        insert_user(&conn, &make_user("A", "a@example.com", Role::Patient)).unwrap();
        insert_user(&conn, &make_user("B", "b@example.com", Role::Patient)).unwrap();
        insert_user(&conn, &make_user("C", "c@example.com", Role::Admin)).unwrap();

        assert_eq!(count_users_by_role(&conn, Role::Patient).unwrap(), 2);
        assert_eq!(count_users_by_role(&conn, Role::Doctor).unwrap(), 0);
        assert_eq!(list_users(&conn).unwrap().len(), 3);
    }
}
