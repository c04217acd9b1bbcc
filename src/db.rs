use anyhow::Result;
use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::models::User;

/// Run database migrations / 运行数据库迁移
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            email TEXT NOT NULL UNIQUE COLLATE NOCASE,
            hashed_password TEXT NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 1,
            is_superuser INTEGER NOT NULL DEFAULT 0,
            is_verified INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    tracing::debug!("Database migrations applied");
    Ok(())
}

pub async fn find_user_by_id(pool: &SqlitePool, id: &str) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
}

/// Email lookup is case-insensitive (column collation)
pub async fn find_user_by_email(pool: &SqlitePool, email: &str) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = ?")
        .bind(email)
        .fetch_optional(pool)
        .await
}

/// Insert a new active, unverified, non-superuser account / 创建用户
pub async fn insert_user(pool: &SqlitePool, email: &str, hashed_password: &str) -> Result<User, sqlx::Error> {
    let now = Utc::now().to_rfc3339();
    let user = User {
        id: Uuid::new_v4().to_string(),
        email: email.to_string(),
        hashed_password: hashed_password.to_string(),
        is_active: true,
        is_superuser: false,
        is_verified: false,
        created_at: now.clone(),
        updated_at: now,
    };

    sqlx::query(
        "INSERT INTO users (id, email, hashed_password, is_active, is_superuser, is_verified, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&user.id)
    .bind(&user.email)
    .bind(&user.hashed_password)
    .bind(user.is_active)
    .bind(user.is_superuser)
    .bind(user.is_verified)
    .bind(&user.created_at)
    .bind(&user.updated_at)
    .execute(pool)
    .await?;

    Ok(user)
}

/// Persist every mutable column of `user`, bumping `updated_at` / 保存用户
pub async fn save_user(pool: &SqlitePool, user: &mut User) -> Result<(), sqlx::Error> {
    user.updated_at = Utc::now().to_rfc3339();
    sqlx::query(
        "UPDATE users SET email = ?, hashed_password = ?, is_active = ?, is_superuser = ?, is_verified = ?, updated_at = ?
         WHERE id = ?",
    )
    .bind(&user.email)
    .bind(&user.hashed_password)
    .bind(user.is_active)
    .bind(user.is_superuser)
    .bind(user.is_verified)
    .bind(&user.updated_at)
    .bind(&user.id)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn delete_user(pool: &SqlitePool, id: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM users WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// True when `err` is a UNIQUE constraint failure (e.g. a duplicate email)
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.is_unique_violation())
}

#[cfg(test)]
pub(crate) async fn memory_pool() -> SqlitePool {
    // single connection: every new connection to :memory: is a fresh database
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    run_migrations(&pool).await.unwrap();
    pool
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_user_crud() {
        let pool = memory_pool().await;

        let mut user = insert_user(&pool, "Player@Example.com", "hash").await.unwrap();
        assert!(user.is_active);
        assert!(!user.is_verified);

        let found = find_user_by_email(&pool, "player@example.com").await.unwrap().unwrap();
        assert_eq!(found.id, user.id);
        let duplicate = insert_user(&pool, "PLAYER@example.com", "hash").await.unwrap_err();
        assert!(is_unique_violation(&duplicate));
        assert!(!is_unique_violation(&sqlx::Error::RowNotFound));

        user.is_verified = true;
        save_user(&pool, &mut user).await.unwrap();
        assert!(find_user_by_id(&pool, &user.id).await.unwrap().unwrap().is_verified);

        assert!(delete_user(&pool, &user.id).await.unwrap());
        assert!(!delete_user(&pool, &user.id).await.unwrap());
        assert!(find_user_by_id(&pool, &user.id).await.unwrap().is_none());
    }
}
