//! Favorites store / 收藏夹

use sqlx::SqlitePool;

use crate::error::Result;
use crate::models::FavoriteEntry;

pub struct FavoritesStore {
    db: SqlitePool,
}

impl FavoritesStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    pub async fn list(&self) -> Result<Vec<FavoriteEntry>> {
        let favorites = sqlx::query_as::<_, FavoriteEntry>(
            "SELECT path, name FROM favorites ORDER BY rowid",
        )
        .fetch_all(&self.db)
        .await?;
        Ok(favorites)
    }

    /// Adding an existing path keeps the original name / 已存在则忽略
    pub async fn add(&self, path: &str, name: &str) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO favorites (path, name) VALUES (?, ?)")
            .bind(path)
            .bind(name)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    pub async fn remove(&self, path: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM favorites WHERE path = ?")
            .bind(path)
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_add_list_remove() {
        let dir = tempfile::tempdir().unwrap();
        let pool = crate::db::open_pool(&dir.path().join("index.db")).await.unwrap();
        let store = FavoritesStore::new(pool);

        store.add("/home/ada/Documents", "Documents").await.unwrap();
        store.add("/home/ada/Music", "Music").await.unwrap();
        store.add("/home/ada/Documents", "Docs again").await.unwrap();

        let favorites = store.list().await.unwrap();
        assert_eq!(favorites.len(), 2);
        assert_eq!(favorites[0].name, "Documents");

        assert!(store.remove("/home/ada/Music").await.unwrap());
        assert!(!store.remove("/home/ada/Music").await.unwrap());
        assert_eq!(store.list().await.unwrap().len(), 1);
    }
}
