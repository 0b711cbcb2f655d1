use std::{future::Future, path::Path};

use serde::Serialize;
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use time::OffsetDateTime;
use tracing::info;

use crate::{module::Module, utils::local_now};

/// Persistence of module documents, one document per `(id, language)`.
pub trait DocumentStore: Send + Sync {
    fn get_module(
        &self,
        id: &str,
        language: &str,
    ) -> impl Future<Output = anyhow::Result<Option<Module>>> + Send;

    fn save_module(
        &self,
        module: &Module,
        language: &str,
    ) -> impl Future<Output = anyhow::Result<()>> + Send;
}

#[derive(Debug, Clone, Serialize)]
pub struct ModuleMeta {
    pub id: String,
    pub language: String,
    pub title: String,
    #[serde(with = "time::serde::rfc3339")]
    pub update_time: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct SqliteDocumentStore {
    database: SqlitePool,
}

impl SqliteDocumentStore {
    pub async fn new(database: SqlitePool) -> anyhow::Result<Self> {
        sqlx::query(
            "create table if not exists module (
                id text not null,
                language text not null,
                title text not null,
                document text not null,
                update_time text not null,
                primary key (id, language)
            )",
        )
        .execute(&database)
        .await?;
        Ok(Self { database })
    }

    /// Open (or create) the database file at `path`.
    pub async fn connect(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true);
        let database = SqlitePoolOptions::new().connect_with(options).await?;
        info!("document store opened at {}", path.as_ref().display());
        Self::new(database).await
    }

    pub fn database(&self) -> &SqlitePool {
        &self.database
    }

    pub async fn list_modules(&self) -> anyhow::Result<Vec<ModuleMeta>> {
        let records = sqlx::query_as::<_, (String, String, String, OffsetDateTime)>(
            "select id, language, title, update_time from module order by id, language",
        )
        .fetch_all(&self.database)
        .await?;
        Ok(records
            .into_iter()
            .map(|(id, language, title, update_time)| ModuleMeta {
                id,
                language,
                title,
                update_time,
            })
            .collect())
    }

    pub async fn languages(&self, id: &str) -> anyhow::Result<Vec<String>> {
        let languages =
            sqlx::query_scalar::<_, String>("select language from module where id = ? order by language")
                .bind(id)
                .fetch_all(&self.database)
                .await?;
        Ok(languages)
    }

    pub async fn delete_module(&self, id: &str) -> anyhow::Result<()> {
        sqlx::query("delete from module where id = ?")
            .bind(id)
            .execute(&self.database)
            .await?;
        Ok(())
    }
}

impl DocumentStore for SqliteDocumentStore {
    async fn get_module(&self, id: &str, language: &str) -> anyhow::Result<Option<Module>> {
        let document = sqlx::query_scalar::<_, String>(
            "select document from module where id = ? and language = ?",
        )
        .bind(id)
        .bind(language)
        .fetch_optional(&self.database)
        .await?;
        document.map(|d| Module::from_json(&d)).transpose()
    }

    async fn save_module(&self, module: &Module, language: &str) -> anyhow::Result<()> {
        let document = module.to_json()?;
        sqlx::query(
            "replace into module (id, language, title, document, update_time) values (?, ?, ?, ?, ?)",
        )
        .bind(&module.id)
        .bind(language)
        .bind(&module.title)
        .bind(document)
        .bind(local_now())
        .execute(&self.database)
        .await?;
        info!("saved module {} ({})", module.id, language);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{module::tests::sample_module, progress::tests::memory_pool};

    #[tokio::test]
    async fn test_save_and_get() {
        let store = SqliteDocumentStore::new(memory_pool().await).await.unwrap();
        let module = sample_module();
        assert!(store.get_module(&module.id, "en").await.unwrap().is_none());
        store.save_module(&module, "en").await.unwrap();
        let mut french = module.clone();
        french.title = "Les bases de Rust".to_string();
        store.save_module(&french, "fr").await.unwrap();

        assert_eq!(store.get_module(&module.id, "en").await.unwrap().unwrap(), module);
        assert_eq!(
            store.get_module(&module.id, "fr").await.unwrap().unwrap().title,
            "Les bases de Rust"
        );
        assert_eq!(store.languages(&module.id).await.unwrap(), vec!["en", "fr"]);
        assert_eq!(store.list_modules().await.unwrap().len(), 2);

        store.delete_module(&module.id).await.unwrap();
        assert!(store.list_modules().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_save_replaces() {
        let store = SqliteDocumentStore::new(memory_pool().await).await.unwrap();
        let mut module = sample_module();
        store.save_module(&module, "en").await.unwrap();
        module.sections.truncate(1);
        store.save_module(&module, "en").await.unwrap();
        let loaded = store.get_module(&module.id, "en").await.unwrap().unwrap();
        assert_eq!(loaded.section_count(), 1);
    }
}
