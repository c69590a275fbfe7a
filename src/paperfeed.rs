use std::{result, sync::Arc, time::Duration};

use log::{debug, error, info, trace, warn};
use serde::{Deserialize, Serialize};
use warp::http;

use crate::auth::{self, AuthAttempt, SessionId};
use crate::backend::{Backend, FindError, InsertError};
use crate::field::{self, Field};
use crate::paper::{
    FeedPaper, Listing, PaperFilter, PaperQuery, RECOMMENDED_DAYS, RECOMMENDED_LIMIT,
};
use crate::session::SessionStore;
use crate::time::Timestamp;
use crate::user::{Profile, User, UserId};

pub struct PaperFeed {
    backend: Backend,
    sessions: Arc<dyn SessionStore>,
    session_ttl: Duration,
}

/// A request that has shown a live session.
pub struct PaperFeedAuthed {
    feed: Arc<PaperFeed>,
    session_id: SessionId,
    user_id: UserId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    pub username: String,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub selected_fields: Vec<Field>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginSuccess {
    pub success: bool,
    pub username: String,
    pub selected_fields: Vec<Field>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Error {
    Internal,
    BadRequest,
    Duplicate,
    InvalidCredentials,
    Unauthenticated,
    PaperNotFound,
    NotFavorite,
}

pub type Result<T> = result::Result<T, Error>;

impl Error {
    /// What the client is told. Never carries internal detail.
    pub fn message(self) -> &'static str {
        match self {
            Self::Internal => "server error",
            Self::BadRequest => "invalid request",
            Self::Duplicate => "username or email already registered",
            Self::InvalidCredentials => "invalid username or password",
            Self::Unauthenticated => "please log in first",
            Self::PaperNotFound => "no such paper",
            Self::NotFavorite => "paper isn't a favorite",
        }
    }
}

impl From<Error> for http::StatusCode {
    fn from(err: Error) -> Self {
        match err {
            Error::Internal => http::StatusCode::INTERNAL_SERVER_ERROR,
            Error::BadRequest | Error::Duplicate => http::StatusCode::BAD_REQUEST,
            Error::InvalidCredentials | Error::Unauthenticated => http::StatusCode::UNAUTHORIZED,
            Error::PaperNotFound | Error::NotFavorite => http::StatusCode::NOT_FOUND,
        }
    }
}

impl warp::reject::Reject for Error {}

impl PaperFeed {
    pub fn new(backend: Backend, sessions: Arc<dyn SessionStore>, session_ttl: Duration) -> Self {
        Self {
            backend,
            sessions,
            session_ttl,
        }
    }

    pub fn session_ttl(&self) -> Duration {
        self.session_ttl
    }

    pub async fn register(&self, registration: Registration) -> Result<()> {
        let Registration {
            username,
            email,
            password,
            selected_fields,
        } = registration;

        let username = username.trim();
        let email = email.trim();

        if username.is_empty() || email.is_empty() || password.is_empty() {
            info!("rejecting registration with missing fields");
            return Err(Error::BadRequest);
        }

        let pwhash = auth::hash_password(&password).map_err(|()| Error::Internal)?;

        let user = User {
            id: UserId::new(),
            username: username.into(),
            email: email.into(),
            pwhash,
            selected_fields: field::dedup(selected_fields),
            created_at: now()?,
        };

        // no existence check first: the backend's uniqueness is the only judge
        self.backend.insert_user(&user).await.map_err(|e| match e {
            InsertError::Duplicate => {
                info!("{username} register: username or email taken");
                Error::Duplicate
            }
            InsertError::Internal => {
                error!("couldn't register {username}");
                Error::Internal
            }
        })?;

        info!("{username} registered, fields {:?}", user.selected_fields);
        Ok(())
    }

    pub async fn login(
        self: &Arc<Self>,
        auth_attempt: AuthAttempt,
    ) -> Result<(PaperFeedAuthed, LoginSuccess)> {
        let username = auth_attempt.user();

        let user = self.backend.find_user(username).await.map_err(|e| {
            if matches!(e, FindError::NotFound) {
                error!("rejecting non-existant user {}", username);
                Error::InvalidCredentials
            } else {
                error!("couldn't authenticate user {}: {e:?}", username);
                Error::Internal
            }
        })?;

        if !auth_attempt.matches(&user.pwhash) {
            error!("wrong password for user {}", username);
            return Err(Error::InvalidCredentials);
        }

        let session_id = SessionId::new();
        self.sessions.set(session_id, user.id, self.session_ttl);

        info!("{username} login: new session created");

        let authed = PaperFeedAuthed {
            feed: Arc::clone(self),
            session_id,
            user_id: user.id,
        };
        let success = LoginSuccess {
            success: true,
            username: user.username,
            selected_fields: user.selected_fields,
        };

        Ok((authed, success))
    }

    pub fn authenticate(self: &Arc<Self>, session_id: SessionId) -> Result<PaperFeedAuthed> {
        match self.sessions.get(&session_id) {
            Some(user_id) => {
                debug!("found user by session");
                Ok(PaperFeedAuthed {
                    feed: Arc::clone(self),
                    session_id,
                    user_id,
                })
            }
            None => {
                debug!("no live session {session_id}");
                Err(Error::Unauthenticated)
            }
        }
    }

    /// Forgets the session, if there was one.
    pub fn logout(&self, session_id: Option<SessionId>) {
        match session_id {
            Some(id) => {
                self.sessions.delete(&id);
                info!("session {id} logged out");
            }
            None => trace!("logout without a session"),
        }
    }

    pub fn purge_sessions(&self) -> usize {
        self.sessions.purge_expired()
    }

    #[cfg(test)]
    pub fn backend(&self) -> &Backend {
        &self.backend
    }
}

impl PaperFeedAuthed {
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    async fn user(&self) -> Result<User> {
        self.feed
            .backend
            .find_user_by_id(self.user_id)
            .await
            .map_err(|e| match e {
                FindError::NotFound => {
                    warn!("session {} names missing user {}", self.session_id, self.user_id);
                    Error::Unauthenticated
                }
                FindError::Internal => {
                    error!("couldn't load user {}", self.user_id);
                    Error::Internal
                }
            })
    }

    pub async fn profile(&self) -> Result<Profile> {
        self.user().await.map(Profile::from)
    }

    pub async fn papers(&self, listing: Listing, filter: PaperFilter) -> Result<Vec<FeedPaper>> {
        let user = self.user().await?;
        let username = &user.username;

        let fields = match filter.field {
            Some(field) if user.selected_fields.contains(&field) => vec![field],
            Some(field) => {
                debug!("{username} asked for unselected field {field}");
                vec![]
            }
            None => user.selected_fields.clone(),
        };

        if fields.is_empty() {
            info!("{username}, no fields to recommend from");
            return Ok(vec![]);
        }

        let days = match (filter.days, listing) {
            (Some(days), _) => Some(i64::from(days)),
            (None, Listing::All) => None,
            (None, Listing::Recommended) => Some(RECOMMENDED_DAYS),
        };
        let since = match days {
            Some(days) => Some(now()?.days_before(days)),
            None => None,
        };
        let limit = match listing {
            Listing::All => None,
            Listing::Recommended => Some(RECOMMENDED_LIMIT),
        };

        let query = PaperQuery {
            fields,
            since,
            limit,
        };

        trace!("{username} querying papers: {query:?}");

        let papers = self
            .feed
            .backend
            .papers(&query)
            .await
            .map_err(|()| Error::Internal)?;
        let favorites = self.favorite_ids(&user).await?;

        info!("{username}, {} papers ({listing:?})", papers.len());
        Ok(FeedPaper::mark(papers, &favorites))
    }

    async fn favorite_ids(&self, user: &User) -> Result<Vec<String>> {
        self.feed
            .backend
            .favorite_ids(user.id)
            .await
            .map_err(|()| {
                error!("couldn't load favorites for {}", user.username);
                Error::Internal
            })
    }

    /// Whether the paper wasn't already a favorite.
    pub async fn add_favorite(&self, paper_id: &str) -> Result<bool> {
        let paper_id = paper_id.trim();
        if paper_id.is_empty() {
            return Err(Error::BadRequest);
        }

        let user = self.user().await?;
        let added = self
            .feed
            .backend
            .add_favorite(user.id, paper_id, now()?)
            .await
            .map_err(|e| match e {
                FindError::NotFound => {
                    info!("{} favorite: no paper {paper_id}", user.username);
                    Error::PaperNotFound
                }
                FindError::Internal => Error::Internal,
            })?;

        info!(
            "{} favorite {paper_id}: {}",
            user.username,
            if added { "added" } else { "already there" }
        );
        Ok(added)
    }

    pub async fn remove_favorite(&self, paper_id: &str) -> Result<()> {
        let user = self.user().await?;

        self.feed
            .backend
            .remove_favorite(user.id, paper_id)
            .await
            .map_err(|e| match e {
                FindError::NotFound => Error::NotFavorite,
                FindError::Internal => Error::Internal,
            })?;

        info!("{} unfavorited {paper_id}", user.username);
        Ok(())
    }

    /// Newest favorite first.
    pub async fn favorites(&self) -> Result<Vec<FeedPaper>> {
        let user = self.user().await?;

        let papers = self
            .feed
            .backend
            .favorite_papers(user.id)
            .await
            .map_err(|()| Error::Internal)?;

        debug!("{}, {} favorites", user.username, papers.len());
        Ok(papers
            .into_iter()
            .map(|paper| FeedPaper {
                paper,
                favorite: true,
            })
            .collect())
    }

    /// Which of `paper_ids` are favorites, in the order asked.
    pub async fn check_favorites(&self, paper_ids: &[String]) -> Result<Vec<String>> {
        if paper_ids.is_empty() {
            return Err(Error::BadRequest);
        }

        let user = self.user().await?;
        let favorites = self.favorite_ids(&user).await?;

        Ok(paper_ids
            .iter()
            .filter(|id| favorites.contains(id))
            .cloned()
            .collect())
    }
}

fn now() -> Result<Timestamp> {
    Timestamp::now().map_err(|()| Error::Internal)
}

#[cfg(test)]
pub mod test {
    use super::*;

    use crate::mock;
    use crate::paper::test::paper;
    use crate::session::MemorySessions;
    use crate::time::DAY;

    pub async fn create_feed() -> (tempfile::TempDir, Arc<PaperFeed>) {
        let (dir, backend) = mock::create_backend().await;
        let feed = PaperFeed::new(
            backend,
            Arc::new(MemorySessions::new()),
            Duration::from_secs(60 * 60),
        );

        (dir, Arc::new(feed))
    }

    pub fn registration(username: &str, email: &str, fields: &[Field]) -> Registration {
        Registration {
            username: username.into(),
            email: email.into(),
            password: "correct horse".into(),
            selected_fields: fields.to_vec(),
        }
    }

    async fn login(feed: &Arc<PaperFeed>, username: &str) -> PaperFeedAuthed {
        let (authed, _) = feed
            .login(AuthAttempt::new(username, "correct horse"))
            .await
            .unwrap();
        authed
    }

    #[tokio::test]
    async fn register_then_login() {
        let (_dir, feed) = create_feed().await;

        feed.register(registration(
            "alice",
            "alice@example.com",
            &[Field::Physics, Field::Medicine],
        ))
        .await
        .unwrap();

        let (_, success) = feed
            .login(AuthAttempt::new("alice", "correct horse"))
            .await
            .unwrap();

        assert!(success.success);
        assert_eq!(success.username, "alice");
        assert_eq!(success.selected_fields, [Field::Physics, Field::Medicine]);
    }

    #[tokio::test]
    async fn duplicate_identity() {
        let (_dir, feed) = create_feed().await;

        feed.register(registration("alice", "a@example.com", &[]))
            .await
            .unwrap();

        assert_eq!(
            feed.register(registration("alice", "b@example.com", &[])).await,
            Err(Error::Duplicate)
        );
        assert_eq!(
            feed.register(registration("bob", "a@example.com", &[])).await,
            Err(Error::Duplicate)
        );

        // bob's failed attempt didn't create him
        assert!(matches!(
            feed.login(AuthAttempt::new("bob", "correct horse")).await,
            Err(Error::InvalidCredentials)
        ));
    }

    #[tokio::test]
    async fn missing_fields_rejected() {
        let (_dir, feed) = create_feed().await;

        assert_eq!(
            feed.register(registration("  ", "a@example.com", &[])).await,
            Err(Error::BadRequest)
        );
        assert_eq!(
            feed.register(registration("alice", "", &[])).await,
            Err(Error::BadRequest)
        );

        let mut no_password = registration("alice", "a@example.com", &[]);
        no_password.password.clear();
        assert_eq!(feed.register(no_password).await, Err(Error::BadRequest));
    }

    #[tokio::test]
    async fn wrong_password_or_user() {
        let (_dir, feed) = create_feed().await;

        feed.register(registration("alice", "a@example.com", &[]))
            .await
            .unwrap();

        assert!(matches!(
            feed.login(AuthAttempt::new("alice", "incorrect horse")).await,
            Err(Error::InvalidCredentials)
        ));
        assert!(matches!(
            feed.login(AuthAttempt::new("mallory", "correct horse")).await,
            Err(Error::InvalidCredentials)
        ));
    }

    #[tokio::test]
    async fn logout_kills_session() {
        let (_dir, feed) = create_feed().await;

        feed.register(registration("alice", "a@example.com", &[Field::Physics]))
            .await
            .unwrap();
        let authed = login(&feed, "alice").await;
        let session = *authed.session_id();

        let authed = feed.authenticate(session).unwrap();
        authed.papers(Listing::All, PaperFilter::default()).await.unwrap();

        feed.logout(Some(session));
        assert!(matches!(
            feed.authenticate(session),
            Err(Error::Unauthenticated)
        ));

        // a second logout, or one without a session, is harmless
        feed.logout(Some(session));
        feed.logout(None);
    }

    #[tokio::test]
    async fn expired_session() {
        let (_dir, backend) = mock::create_backend().await;
        let feed = Arc::new(PaperFeed::new(
            backend,
            Arc::new(MemorySessions::new()),
            Duration::ZERO,
        ));

        feed.register(registration("alice", "a@example.com", &[]))
            .await
            .unwrap();
        let session = *login(&feed, "alice").await.session_id();

        assert!(matches!(
            feed.authenticate(session),
            Err(Error::Unauthenticated)
        ));
        assert_eq!(feed.purge_sessions(), 1);
    }

    #[tokio::test]
    async fn only_selected_fields() {
        let (dir, feed) = create_feed().await;
        let today = Timestamp::now().unwrap();

        mock::add_papers(
            dir.path(),
            &feed.backend,
            &[
                paper("phys", Field::Physics, today),
                paper("chem", Field::Chemistry, today),
            ],
        )
        .await;

        feed.register(registration("alice", "a@example.com", &[Field::Physics]))
            .await
            .unwrap();
        let authed = login(&feed, "alice").await;

        for listing in [Listing::All, Listing::Recommended] {
            let papers = authed.papers(listing, PaperFilter::default()).await.unwrap();
            let ids: Vec<_> = papers.iter().map(|p| p.paper.id.as_str()).collect();
            assert_eq!(ids, ["phys"]);
        }

        // asking for a field you didn't pick gets nothing
        let chemistry = PaperFilter {
            field: Some(Field::Chemistry),
            days: None,
        };
        assert!(authed
            .papers(Listing::All, chemistry)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn newest_first() {
        let (dir, feed) = create_feed().await;
        let t = Timestamp::now().unwrap();

        mock::add_papers(
            dir.path(),
            &feed.backend,
            &[
                paper("yesterday", Field::Physics, t.days_before(1)),
                paper("today", Field::Physics, t),
            ],
        )
        .await;

        feed.register(registration("alice", "a@example.com", &[Field::Physics]))
            .await
            .unwrap();
        let authed = login(&feed, "alice").await;

        let papers = authed.papers(Listing::All, PaperFilter::default()).await.unwrap();
        let ids: Vec<_> = papers.iter().map(|p| p.paper.id.as_str()).collect();
        assert_eq!(ids, ["today", "yesterday"]);
    }

    #[tokio::test]
    async fn recommended_is_windowed_and_capped() {
        let (dir, feed) = create_feed().await;
        let now = Timestamp::now().unwrap();

        let mut papers: Vec<_> = (0..25)
            .map(|i| {
                paper(
                    &format!("recent{i}"),
                    Field::Biology,
                    Timestamp::from_i64(now.secs() - i * 60),
                )
            })
            .collect();
        papers.push(paper("stale", Field::Biology, now.days_before(8)));
        papers.push(paper("edge", Field::Biology, Timestamp::from_i64(now.secs() - 6 * DAY)));
        mock::add_papers(dir.path(), &feed.backend, &papers).await;

        feed.register(registration("alice", "a@example.com", &[Field::Biology]))
            .await
            .unwrap();
        let authed = login(&feed, "alice").await;

        let recommended = authed.papers(Listing::Recommended, PaperFilter::default()).await.unwrap();
        assert_eq!(recommended.len(), RECOMMENDED_LIMIT);
        assert_eq!(recommended[0].paper.id, "recent0");
        assert!(recommended.iter().all(|p| p.paper.id != "stale"));
        assert!(recommended
            .windows(2)
            .all(|w| w[0].paper.publish_date >= w[1].paper.publish_date));

        let all = authed.papers(Listing::All, PaperFilter::default()).await.unwrap();
        assert_eq!(all.len(), 27);
        assert_eq!(all.last().unwrap().paper.id, "stale");
    }

    #[tokio::test]
    async fn no_fields_no_papers() {
        let (dir, feed) = create_feed().await;

        mock::add_papers(
            dir.path(),
            &feed.backend,
            &[paper("p", Field::Physics, Timestamp::now().unwrap())],
        )
        .await;

        feed.register(registration("alice", "a@example.com", &[]))
            .await
            .unwrap();
        let authed = login(&feed, "alice").await;

        assert!(authed.papers(Listing::All, PaperFilter::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn profile_hides_hash() {
        let (_dir, feed) = create_feed().await;

        feed.register(registration("alice", " a@example.com ", &[Field::Engineering]))
            .await
            .unwrap();
        let authed = login(&feed, "alice").await;

        let profile = authed.profile().await.unwrap();
        assert_eq!(profile.username, "alice");
        assert_eq!(profile.email, "a@example.com");
        assert_eq!(profile.selected_fields, [Field::Engineering]);

        let json = serde_json::to_value(&profile).unwrap();
        assert!(json.get("pwhash").is_none());
        assert!(json.get("selectedFields").is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_registrations_have_one_winner() {
        let (_dir, feed) = create_feed().await;

        let tasks: Vec<_> = (0..16)
            .map(|i| {
                let feed = Arc::clone(&feed);
                tokio::spawn(async move {
                    feed.register(registration("alice", &format!("alice{i}@example.com"), &[]))
                        .await
                })
            })
            .collect();

        let (mut ok, mut duplicate) = (0, 0);
        for task in tasks {
            match task.await.unwrap() {
                Ok(()) => ok += 1,
                Err(Error::Duplicate) => duplicate += 1,
                Err(e) => panic!("unexpected registration error {e:?}"),
            }
        }

        assert_eq!((ok, duplicate), (1, 15));
    }

    #[tokio::test]
    async fn all_listing_has_no_date_floor() {
        let (dir, feed) = create_feed().await;

        mock::add_papers(
            dir.path(),
            &feed.backend,
            &[
                paper("old", Field::Physics, Timestamp::from_i64(-144_720_000)),
                paper("new", Field::Physics, Timestamp::now().unwrap()),
            ],
        )
        .await;

        feed.register(registration("alice", "a@example.com", &[Field::Physics]))
            .await
            .unwrap();
        let authed = login(&feed, "alice").await;

        let papers = authed.papers(Listing::All, PaperFilter::default()).await.unwrap();
        let ids: Vec<_> = papers.iter().map(|p| p.paper.id.as_str()).collect();
        assert_eq!(ids, ["new", "old"]);
    }

    #[tokio::test]
    async fn days_sets_the_window() {
        let (dir, feed) = create_feed().await;
        let now = Timestamp::now().unwrap();

        mock::add_papers(
            dir.path(),
            &feed.backend,
            &[
                paper("today", Field::Medicine, now),
                paper("three", Field::Medicine, now.days_before(3)),
                paper("ten", Field::Medicine, now.days_before(10)),
            ],
        )
        .await;

        feed.register(registration("alice", "a@example.com", &[Field::Medicine]))
            .await
            .unwrap();
        let authed = login(&feed, "alice").await;

        let ids = |papers: Vec<FeedPaper>| -> Vec<String> {
            papers.into_iter().map(|p| p.paper.id).collect()
        };
        let days = |days| PaperFilter {
            field: None,
            days: Some(days),
        };

        let papers = authed.papers(Listing::All, days(5)).await.unwrap();
        assert_eq!(ids(papers), ["today", "three"]);

        let papers = authed.papers(Listing::Recommended, PaperFilter::default()).await.unwrap();
        assert_eq!(ids(papers), ["today", "three"]);

        let papers = authed.papers(Listing::Recommended, days(30)).await.unwrap();
        assert_eq!(ids(papers), ["today", "three", "ten"]);

        let papers = authed.papers(Listing::All, days(0)).await.unwrap();
        assert!(ids(papers).iter().all(|id| id == "today"));
    }

    #[tokio::test]
    async fn favorites() {
        let (dir, feed) = create_feed().await;
        let now = Timestamp::now().unwrap();

        mock::add_papers(
            dir.path(),
            &feed.backend,
            &[
                paper("a", Field::Chemistry, now),
                paper("b", Field::Chemistry, now.days_before(1)),
            ],
        )
        .await;

        feed.register(registration("alice", "a@example.com", &[Field::Chemistry]))
            .await
            .unwrap();
        feed.register(registration("bob", "b@example.com", &[Field::Chemistry]))
            .await
            .unwrap();
        let alice = login(&feed, "alice").await;
        let bob = login(&feed, "bob").await;

        assert_eq!(alice.add_favorite("b").await, Ok(true));
        assert_eq!(alice.add_favorite(" b ").await, Ok(false));
        assert_eq!(alice.add_favorite("nope").await, Err(Error::PaperNotFound));
        assert_eq!(alice.add_favorite("  ").await, Err(Error::BadRequest));

        let papers = alice.papers(Listing::All, PaperFilter::default()).await.unwrap();
        let marks: Vec<_> = papers
            .iter()
            .map(|p| (p.paper.id.as_str(), p.favorite))
            .collect();
        assert_eq!(marks, [("a", false), ("b", true)]);

        // favorites are per user
        let papers = bob.papers(Listing::All, PaperFilter::default()).await.unwrap();
        assert!(papers.iter().all(|p| !p.favorite));
        assert!(bob.favorites().await.unwrap().is_empty());

        let favorites = alice.favorites().await.unwrap();
        assert_eq!(favorites.len(), 1);
        assert_eq!(favorites[0].paper.id, "b");
        assert!(favorites[0].favorite);

        let asked = ["a".to_owned(), "b".to_owned(), "zzz".to_owned()];
        assert_eq!(alice.check_favorites(&asked).await.unwrap(), ["b"]);
        assert_eq!(alice.check_favorites(&[]).await, Err(Error::BadRequest));

        alice.remove_favorite("b").await.unwrap();
        assert_eq!(alice.remove_favorite("b").await, Err(Error::NotFavorite));
        assert!(alice.favorites().await.unwrap().is_empty());
    }
}
