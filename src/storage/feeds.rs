//! Feed aggregate persistence.
//!
//! The store works in whole aggregates: `load_feed` materializes the
//! complete feed (config row, ordered sources, all episodes) and
//! `save_feed` commits the merged aggregate in one transaction, so either
//! the whole updated episode set plus `last_build_date` becomes visible
//! or none of it does.

use chrono::DateTime;
use sqlx::FromRow;

use super::schema::{Database, StoreError};
use crate::feed::{Enclosure, Episode, Feed, Source};

#[derive(FromRow)]
struct EpisodeRow {
    title: String,
    link: String,
    enclosure_length: String,
    enclosure_type: String,
    enclosure_url: String,
    published: Option<String>,
    description: String,
    duration: String,
    image: String,
    author: String,
}

impl EpisodeRow {
    fn into_episode(self, feed_name: &str) -> Episode {
        let published = self.published.as_deref().and_then(|text| {
            match DateTime::parse_from_rfc3339(text) {
                Ok(date) => Some(date),
                Err(error) => {
                    tracing::warn!(
                        feed = %feed_name,
                        value = %text,
                        error = %error,
                        "corrupt stored timestamp, treating as unknown"
                    );
                    None
                }
            }
        });
        Episode {
            title: self.title,
            enclosure: Enclosure {
                length: self.enclosure_length,
                mime_type: self.enclosure_type,
                url: self.enclosure_url,
            },
            link: self.link,
            published,
            description: self.description,
            duration: self.duration,
            image: self.image,
            author: self.author,
        }
    }
}

impl Database {
    /// Insert or update a feed's configured fields and replace its source
    /// list. `last_build_date` and accumulated episodes are left alone,
    /// so re-seeding from configuration at startup never loses sync state.
    pub async fn upsert_feed(&self, feed: &Feed) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO feeds (name, title, link, language, description, image)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(name) DO UPDATE SET
                title = excluded.title,
                link = excluded.link,
                language = excluded.language,
                description = excluded.description,
                image = excluded.image
        "#,
        )
        .bind(&feed.name)
        .bind(&feed.title)
        .bind(&feed.link)
        .bind(&feed.language)
        .bind(&feed.description)
        .bind(&feed.image)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM sources WHERE feed_name = ?")
            .bind(&feed.name)
            .execute(&mut *tx)
            .await?;
        for (position, source) in feed.sources.iter().enumerate() {
            sqlx::query("INSERT INTO sources (feed_name, position, url) VALUES (?, ?, ?)")
                .bind(&feed.name)
                .bind(position as i64)
                .bind(&source.url)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// All configured feed names, sorted.
    pub async fn feed_names(&self) -> Result<Vec<String>, StoreError> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT name FROM feeds ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|(name,)| name).collect())
    }

    /// Load the whole feed aggregate, or `None` for an unknown name.
    pub async fn load_feed(&self, name: &str) -> Result<Option<Feed>, StoreError> {
        type FeedRow = (String, String, String, String, String, Option<String>);
        let row: Option<FeedRow> = sqlx::query_as(
            r#"
            SELECT title, link, language, description, image, last_build_date
            FROM feeds WHERE name = ?
        "#,
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        let Some((title, link, language, description, image, last_build_date)) = row else {
            return Ok(None);
        };

        let sources: Vec<(String,)> =
            sqlx::query_as("SELECT url FROM sources WHERE feed_name = ? ORDER BY position")
                .bind(name)
                .fetch_all(&self.pool)
                .await?;

        let rows = sqlx::query_as::<_, EpisodeRow>(
            r#"
            SELECT title, link, enclosure_length, enclosure_type, enclosure_url,
                   published, description, duration, image, author
            FROM episodes WHERE feed_name = ?
        "#,
        )
        .bind(name)
        .fetch_all(&self.pool)
        .await?;

        let last_build_date = last_build_date
            .as_deref()
            .and_then(|text| match DateTime::parse_from_rfc3339(text) {
                Ok(date) => Some(date),
                Err(error) => {
                    tracing::warn!(
                        feed = %name,
                        value = %text,
                        error = %error,
                        "corrupt stored last_build_date, treating as unknown"
                    );
                    None
                }
            });

        let mut feed = Feed {
            name: name.to_string(),
            title,
            link,
            language,
            description,
            image,
            sources: sources
                .into_iter()
                .map(|(url,)| Source { url })
                .collect(),
            last_build_date,
            episodes: rows
                .into_iter()
                .map(|row| row.into_episode(name))
                .collect(),
        };
        feed.sort_episodes();
        Ok(Some(feed))
    }

    /// Persist the merged aggregate as one atomic commit.
    ///
    /// Episodes already present (same `(title, link)` within the feed) are
    /// skipped, never rewritten; stored episodes are immutable.
    pub async fn save_feed(&self, feed: &Feed) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("UPDATE feeds SET last_build_date = ? WHERE name = ?")
            .bind(feed.last_build_date.map(|date| date.to_rfc3339()))
            .bind(&feed.name)
            .execute(&mut *tx)
            .await?;

        for episode in &feed.episodes {
            sqlx::query(
                r#"
                INSERT INTO episodes (
                    feed_name, title, link,
                    enclosure_length, enclosure_type, enclosure_url,
                    published, description, duration, image, author
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(feed_name, title, link) DO NOTHING
            "#,
            )
            .bind(&feed.name)
            .bind(&episode.title)
            .bind(&episode.link)
            .bind(&episode.enclosure.length)
            .bind(&episode.enclosure.mime_type)
            .bind(&episode.enclosure.url)
            .bind(episode.published.map(|date| date.to_rfc3339()))
            .bind(&episode.description)
            .bind(&episode.duration)
            .bind(&episode.image)
            .bind(&episode.author)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}
