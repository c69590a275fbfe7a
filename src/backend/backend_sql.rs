use std::path::{Path, PathBuf};

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{query, query_as, FromRow, Pool, Sqlite};

use log::{error, info, warn};

use crate::backend::{FindError, InsertError};
use crate::paper::{Paper, PaperQuery};
use crate::time::Timestamp;
use crate::user::{User, UserId};

pub struct Backend(pub Pool<Sqlite>);

fn into_sql(path: &Path) -> PathBuf {
    path.join("papers.db")
}

#[derive(FromRow)]
struct UserRow {
    id: String,
    username: String,
    email: String,
    pwhash: String,
    selected_fields: String,
    created_at: Timestamp,
}

#[derive(FromRow)]
struct PaperRow {
    id: String,
    title: String,
    authors: String,
    #[sqlx(rename = "abstract")]
    r#abstract: String,
    journal: String,
    publish_date: Timestamp,
    field: String,
}

impl TryFrom<UserRow> for User {
    type Error = String;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        let UserRow {
            id,
            username,
            email,
            pwhash,
            selected_fields,
            created_at,
        } = row;

        Ok(User {
            id: id
                .parse()
                .map_err(|()| format!("invalid user id {id:?}"))?,
            selected_fields: serde_json::from_str(&selected_fields)
                .map_err(|e| format!("invalid selected_fields for {username}: {e}"))?,
            username,
            email,
            pwhash,
            created_at,
        })
    }
}

impl TryFrom<PaperRow> for Paper {
    type Error = String;

    fn try_from(row: PaperRow) -> Result<Self, Self::Error> {
        let PaperRow {
            id,
            title,
            authors,
            r#abstract,
            journal,
            publish_date,
            field,
        } = row;

        Ok(Paper {
            authors: serde_json::from_str(&authors)
                .map_err(|e| format!("invalid authors for paper {id}: {e}"))?,
            field: field
                .parse()
                .map_err(|()| format!("invalid field {field:?} for paper {id}"))?,
            id,
            title,
            r#abstract,
            journal,
            publish_date,
        })
    }
}

impl Backend {
    pub async fn new(data_dir: &Path) -> Result<Self, ()> {
        let path = into_sql(data_dir);
        let options = SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .connect_with(options)
            .await
            .map_err(|e| {
                error!("couldn't open {path:?}: {e}");
            })?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| {
                error!("migration: {e}");
            })?;

        info!("Using {:?}", path);
        Ok(Self(pool))
    }
}

impl Backend {
    pub async fn insert_user(&self, user: &User) -> Result<(), InsertError> {
        let fields = serde_json::to_string(&user.selected_fields).map_err(|e| {
            error!("couldn't convert fields to json: {e:?}");
            InsertError::Internal
        })?;

        query(
            "
            INSERT INTO users
            (id, username, email, pwhash, selected_fields, created_at)
            VALUES
            (?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(user.id.to_string())
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.pwhash)
        .bind(fields)
        .bind(user.created_at)
        .execute(&self.0)
        .await
        .map(|_| ())
        .map_err(|e| match e {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                warn!("user {} clashes: {db_err}", user.username);
                InsertError::Duplicate
            }
            e => {
                error!("error inserting user: {e:?}");
                InsertError::Internal
            }
        })
    }

    async fn find_user_where(&self, column: &str, value: &str) -> Result<User, FindError> {
        // `column` is one of ours, never client input
        let sql = format!("SELECT * FROM users WHERE {column} = ?");

        let row: UserRow = query_as(&sql)
            .bind(value)
            .fetch_one(&self.0)
            .await
            .map_err(|e| {
                if matches!(e, sqlx::Error::RowNotFound) {
                    FindError::NotFound
                } else {
                    error!("couldn't query user by {column}: {e:?}");
                    FindError::Internal
                }
            })?;

        row.try_into().map_err(|e| {
            error!("{e}");
            FindError::Internal
        })
    }

    pub async fn find_user(&self, username: &str) -> Result<User, FindError> {
        self.find_user_where("username", username).await
    }

    pub async fn find_user_by_id(&self, id: UserId) -> Result<User, FindError> {
        self.find_user_where("id", &id.to_string()).await
    }
}

impl Backend {
    pub async fn papers(&self, query: &PaperQuery) -> Result<Vec<Paper>, ()> {
        let fields = serde_json::to_string(
            &query.fields.iter().map(|f| f.as_str()).collect::<Vec<_>>(),
        )
        .map_err(|e| {
            error!("couldn't convert fields to json: {e:?}");
        })?;
        // sqlite treats a negative limit as "no limit"
        let limit = query.limit.map(|l| l as i64).unwrap_or(-1);

        let rows: Vec<PaperRow> = query_as(
            r#"
            SELECT id, title, authors, abstract, journal, publish_date, field
            FROM papers
            WHERE field IN (SELECT value FROM json_each(?))
                AND (? IS NULL OR publish_date >= ?)
            ORDER BY publish_date DESC
            LIMIT ?
            "#,
        )
        .bind(fields)
        .bind(query.since)
        .bind(query.since)
        .bind(limit)
        .fetch_all(&self.0)
        .await
        .map_err(|e| {
            error!("error selecting papers: {e:?}");
        })?;

        rows.into_iter()
            .map(Paper::try_from)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| {
                error!("couldn't construct papers from backend: {e}");
            })
    }
}

impl Backend {
    /// Whether the favorite is new. `NotFound` if there's no such paper.
    pub async fn add_favorite(
        &self,
        user: UserId,
        paper_id: &str,
        added_at: Timestamp,
    ) -> Result<bool, FindError> {
        let exists: Option<(i64,)> = query_as("SELECT 1 FROM papers WHERE id = ?")
            .bind(paper_id)
            .fetch_optional(&self.0)
            .await
            .map_err(|e| {
                error!("couldn't look up paper {paper_id}: {e:?}");
                FindError::Internal
            })?;
        if exists.is_none() {
            return Err(FindError::NotFound);
        }

        query(
            "
            INSERT OR IGNORE INTO favorites
            (user_id, paper_id, created_at)
            VALUES
            (?, ?, ?)
            ",
        )
        .bind(user.to_string())
        .bind(paper_id)
        .bind(added_at)
        .execute(&self.0)
        .await
        .map(|result| result.rows_affected() == 1)
        .map_err(|e| {
            error!("error inserting favorite: {e:?}");
            FindError::Internal
        })
    }

    /// `NotFound` if the paper wasn't a favorite.
    pub async fn remove_favorite(&self, user: UserId, paper_id: &str) -> Result<(), FindError> {
        let result = query("DELETE FROM favorites WHERE user_id = ? AND paper_id = ?")
            .bind(user.to_string())
            .bind(paper_id)
            .execute(&self.0)
            .await
            .map_err(|e| {
                error!("error deleting favorite: {e:?}");
                FindError::Internal
            })?;

        match result.rows_affected() {
            0 => Err(FindError::NotFound),
            _ => Ok(()),
        }
    }

    /// Newest favorite first.
    pub async fn favorite_ids(&self, user: UserId) -> Result<Vec<String>, ()> {
        let rows: Vec<(String,)> = query_as(
            "
            SELECT paper_id FROM favorites
            WHERE user_id = ?
            ORDER BY created_at DESC, rowid DESC
            ",
        )
        .bind(user.to_string())
        .fetch_all(&self.0)
        .await
        .map_err(|e| {
            error!("error selecting favorites: {e:?}");
        })?;

        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    /// Newest favorite first.
    pub async fn favorite_papers(&self, user: UserId) -> Result<Vec<Paper>, ()> {
        let rows: Vec<PaperRow> = query_as(
            r#"
            SELECT p.id, p.title, p.authors, p.abstract, p.journal, p.publish_date, p.field
            FROM favorites f
            JOIN papers p ON p.id = f.paper_id
            WHERE f.user_id = ?
            ORDER BY f.created_at DESC, f.rowid DESC
            "#,
        )
        .bind(user.to_string())
        .fetch_all(&self.0)
        .await
        .map_err(|e| {
            error!("error selecting favorite papers: {e:?}");
        })?;

        rows.into_iter()
            .map(Paper::try_from)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| {
                error!("couldn't construct papers from backend: {e}");
            })
    }
}
