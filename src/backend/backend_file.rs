use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use log::{error, info, trace, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::backend::{FindError, InsertError};
use crate::paper::{sort_and_limit, Paper, PaperQuery};
use crate::time::Timestamp;
use crate::user::{User, UserId};

/// Keeps everything as files under a data directory:
///
/// - `users/<id>.json`: one user record each
/// - `usernames/<sha256(username)>`, `emails/<sha256(email)>`: index files
///   holding the owning user's id. They're created exclusively, so a second
///   claim on the same name fails at the filesystem
/// - `papers.txt`: one JSON paper per line, written by whatever ingests them
/// - `favorites/<id>.json`: a user's favorites, oldest first
pub struct Backend {
    root: PathBuf,
    /// Serialises read-modify-write of favorites files.
    favorites_lock: Mutex<()>,
}

#[derive(Debug, Deserialize, Serialize)]
struct Favorite {
    paper_id: String,
    added_at: Timestamp,
}

macro_rules! path {
    ($root: expr, $($components: expr),*) => {
        {
            let mut p = $root.clone();
            path!(@internal, p, $($components),*);
            p
        }
    };
    (@internal, $p:expr, $next:expr, $($rest: expr),*) => {
        $p.push($next);
        path!(@internal, $p, $($rest),*);
    };
    (@internal, $p:expr, $next:expr) => {
        $p.push($next);
    };
}

#[derive(Clone, Copy)]
enum Index {
    Username,
    Email,
}

impl Index {
    fn dir(self) -> &'static str {
        match self {
            Index::Username => "usernames",
            Index::Email => "emails",
        }
    }
}

impl Backend {
    pub async fn new(data_dir: &Path) -> Result<Self, ()> {
        let root = data_dir.to_path_buf();

        for dir in ["users", "favorites", Index::Username.dir(), Index::Email.dir()] {
            let path = path!(root, dir);
            fs::create_dir_all(&path).map_err(|e| {
                error!("couldn't create \"{path:?}\": {e:?}");
            })?;
        }

        info!("Using {:?}", root);
        Ok(Self {
            root,
            favorites_lock: Mutex::new(()),
        })
    }

    fn index_path(&self, index: Index, key: &str) -> PathBuf {
        path!(self.root, index.dir(), sha256::digest(key))
    }

    fn user_path(&self, id: UserId) -> PathBuf {
        path!(self.root, "users", format!("{id}.json"))
    }

    fn favorites_path(&self, id: UserId) -> PathBuf {
        path!(self.root, "favorites", format!("{id}.json"))
    }

    /// Atomically takes `key` in `index` for `id`.
    fn claim(&self, index: Index, key: &str, id: UserId) -> Result<(), InsertError> {
        let path = self.index_path(index, key);

        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| {
                if e.kind() == ErrorKind::AlreadyExists {
                    InsertError::Duplicate
                } else {
                    error!("claim \"{path:?}\": {e:?}");
                    InsertError::Internal
                }
            })?;

        write!(file, "{id}").map_err(|e| {
            error!("write \"{path:?}\": {e:?}");
            InsertError::Internal
        })
    }

    fn release(&self, index: Index, key: &str) {
        let path = self.index_path(index, key);

        if let Err(e) = fs::remove_file(&path) {
            warn!("couldn't release \"{path:?}\": {e:?}");
        }
    }

    fn lookup(&self, index: Index, key: &str) -> Result<UserId, FindError> {
        let path = self.index_path(index, key);
        let mut id = String::new();

        File::open(&path)
            .and_then(|mut f| f.read_to_string(&mut id))
            .map_err(|e| {
                if e.kind() == ErrorKind::NotFound {
                    return FindError::NotFound;
                }
                error!("open \"{path:?}\": {e:?}");
                FindError::Internal
            })?;

        id.parse().map_err(|()| {
            error!("invalid user id in \"{path:?}\": {id:?}");
            FindError::Internal
        })
    }
}

impl Backend {
    pub async fn insert_user(&self, user: &User) -> Result<(), InsertError> {
        let path = self.user_path(user.id);
        let json = serde_json::to_string(user).map_err(|e| {
            error!("couldn't convert user to json: {e:?}");
            InsertError::Internal
        })?;

        fs::write(&path, json).map_err(|e| {
            error!("write \"{path:?}\": {e:?}");
            InsertError::Internal
        })?;

        let remove_record = || {
            if let Err(e) = fs::remove_file(&path) {
                warn!("couldn't remove \"{path:?}\": {e:?}");
            }
        };

        if let Err(e) = self.claim(Index::Username, &user.username, user.id) {
            remove_record();
            return Err(e);
        }

        if let Err(e) = self.claim(Index::Email, &user.email, user.id) {
            self.release(Index::Username, &user.username);
            remove_record();
            return Err(e);
        }

        Ok(())
    }

    pub async fn find_user(&self, username: &str) -> Result<User, FindError> {
        let id = self.lookup(Index::Username, username)?;
        self.find_user_by_id(id).await
    }

    pub async fn find_user_by_id(&self, id: UserId) -> Result<User, FindError> {
        let path = self.user_path(id);

        let json = fs::read_to_string(&path).map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                return FindError::NotFound;
            }
            error!("open \"{path:?}\": {e:?}");
            FindError::Internal
        })?;

        serde_json::from_str(&json).map_err(|e| {
            error!("couldn't parse user \"{path:?}\": {e:?}");
            FindError::Internal
        })
    }
}

impl Backend {
    fn read_papers(&self) -> Result<Vec<Paper>, ()> {
        let path = path!(self.root, "papers.txt");
        let file = match File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!("no papers yet, \"{path:?}\" doesn't exist");
                return Ok(vec![]);
            }
            Err(e) => {
                error!("open \"{path:?}\": {e:?}");
                return Err(());
            }
        };

        let mut papers = vec![];

        for (lineno, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|e| {
                error!("read \"{path:?}\": {e:?}");
            })?;

            if line.trim().is_empty() {
                continue;
            }

            match serde_json::from_str(&line) {
                Ok(paper) => papers.push(paper),
                Err(e) => warn!("skipping paper on line {}: {e}", lineno + 1),
            }
        }

        Ok(papers)
    }

    pub async fn papers(&self, query: &PaperQuery) -> Result<Vec<Paper>, ()> {
        let mut papers: Vec<_> = self
            .read_papers()?
            .into_iter()
            .filter(|paper| query.matches(paper))
            .collect();

        sort_and_limit(&mut papers, query.limit);

        Ok(papers)
    }
}

impl Backend {
    fn read_favorites(&self, user: UserId) -> Result<Vec<Favorite>, ()> {
        let path = self.favorites_path(user);

        match fs::read_to_string(&path) {
            Ok(json) => serde_json::from_str(&json).map_err(|e| {
                error!("couldn't parse favorites \"{path:?}\": {e:?}");
            }),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(vec![]),
            Err(e) => {
                error!("open \"{path:?}\": {e:?}");
                Err(())
            }
        }
    }

    fn write_favorites(&self, user: UserId, favorites: &[Favorite]) -> Result<(), ()> {
        let path = self.favorites_path(user);
        let tmp = path.with_extension("json.tmp");

        let json = serde_json::to_string(favorites).map_err(|e| {
            error!("couldn't convert favorites to json: {e:?}");
        })?;

        fs::write(&tmp, json)
            .and_then(|()| fs::rename(&tmp, &path))
            .map_err(|e| {
                error!("write \"{path:?}\": {e:?}");
            })
    }

    /// Whether the favorite is new. `NotFound` if there's no such paper.
    pub async fn add_favorite(
        &self,
        user: UserId,
        paper_id: &str,
        added_at: Timestamp,
    ) -> Result<bool, FindError> {
        let exists = self
            .read_papers()
            .map_err(|()| FindError::Internal)?
            .iter()
            .any(|paper| paper.id == paper_id);
        if !exists {
            return Err(FindError::NotFound);
        }

        let _guard = self.favorites_lock.lock().await;
        let mut favorites = self.read_favorites(user).map_err(|()| FindError::Internal)?;

        if favorites.iter().any(|f| f.paper_id == paper_id) {
            trace!("{user} already has {paper_id}");
            return Ok(false);
        }

        favorites.push(Favorite {
            paper_id: paper_id.into(),
            added_at,
        });

        self.write_favorites(user, &favorites)
            .map_err(|()| FindError::Internal)?;

        Ok(true)
    }

    /// `NotFound` if the paper wasn't a favorite.
    pub async fn remove_favorite(&self, user: UserId, paper_id: &str) -> Result<(), FindError> {
        let _guard = self.favorites_lock.lock().await;
        let mut favorites = self.read_favorites(user).map_err(|()| FindError::Internal)?;

        let before = favorites.len();
        favorites.retain(|f| f.paper_id != paper_id);
        if favorites.len() == before {
            return Err(FindError::NotFound);
        }

        self.write_favorites(user, &favorites)
            .map_err(|()| FindError::Internal)
    }

    /// Newest favorite first.
    pub async fn favorite_ids(&self, user: UserId) -> Result<Vec<String>, ()> {
        let favorites = self.read_favorites(user)?;

        Ok(favorites.into_iter().rev().map(|f| f.paper_id).collect())
    }

    /// Newest favorite first. Favorites whose paper has gone are skipped.
    pub async fn favorite_papers(&self, user: UserId) -> Result<Vec<Paper>, ()> {
        let ids = self.favorite_ids(user).await?;
        let mut papers: HashMap<_, _> = self
            .read_papers()?
            .into_iter()
            .map(|paper| (paper.id.clone(), paper))
            .collect();

        Ok(ids.iter().filter_map(|id| papers.remove(id)).collect())
    }
}
