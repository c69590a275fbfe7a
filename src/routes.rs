use std::convert::Infallible;
use std::path::PathBuf;
use std::sync::Arc;

use cookie::{Cookie, SameSite};
use log::{error, trace};
use serde::Deserialize;
use serde_json::json;
use warp::http::{header, StatusCode};
use warp::reply::Response;
use warp::{Filter, Rejection, Reply};

use crate::auth::{AuthAttempt, SessionId, SESSION_COOKIE};
use crate::field::Field;
use crate::paper::{Listing, PaperFilter};
use crate::paperfeed::{Error, PaperFeed, PaperFeedAuthed, Registration};

const MAX_BODY: u64 = 16 * 1024;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PaperRef {
    paper_id: String,
}

#[derive(Debug, Deserialize)]
struct CheckFavorites {
    /// Comma separated paper ids.
    ids: String,
}

pub fn routes(
    feed: Arc<PaperFeed>,
    secure: bool,
    static_dir: Option<PathBuf>,
) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone {
    let with_feed = warp::any().map(move || Arc::clone(&feed));

    let register = warp::path!("api" / "register")
        .and(warp::post())
        .and(with_feed.clone())
        .and(json_body())
        .and_then(|feed: Arc<PaperFeed>, registration: Registration| async move {
            feed.register(registration).await.map_err(warp::reject::custom)?;

            Ok::<_, Rejection>(warp::reply::with_status(
                warp::reply::json(&json!({ "message": "registered" })),
                StatusCode::CREATED,
            ))
        });

    let login = warp::path!("api" / "login")
        .and(warp::post())
        .and(with_feed.clone())
        .and(json_body())
        .and_then(move |feed: Arc<PaperFeed>, attempt: AuthAttempt| async move {
            let (authed, success) = feed.login(attempt).await.map_err(warp::reject::custom)?;

            let cookie = Cookie::build((SESSION_COOKIE, authed.session_id().to_string()))
                .path("/")
                .http_only(true)
                .same_site(SameSite::Lax)
                .secure(secure)
                .max_age(::time::Duration::seconds(
                    feed.session_ttl().as_secs().try_into().unwrap_or(i64::MAX),
                ))
                .build();

            Ok::<_, Rejection>(warp::reply::with_header(
                warp::reply::json(&success),
                header::SET_COOKIE,
                cookie.to_string(),
            ))
        });

    let logout = warp::path!("api" / "logout")
        .and(warp::post())
        .and(with_feed.clone())
        .and(session())
        .map(move |feed: Arc<PaperFeed>, session_id: Option<SessionId>| {
            feed.logout(session_id);

            let cookie = Cookie::build((SESSION_COOKIE, ""))
                .path("/")
                .http_only(true)
                .same_site(SameSite::Lax)
                .secure(secure)
                .max_age(::time::Duration::ZERO)
                .build();

            warp::reply::with_header(
                warp::reply::json(&json!({ "success": true })),
                header::SET_COOKIE,
                cookie.to_string(),
            )
        });

    let papers = {
        let listing = warp::path!("api" / "papers")
            .map(|| Listing::All)
            .or(warp::path!("api" / "papers" / "recommended").map(|| Listing::Recommended))
            .unify();

        listing
            .and(warp::get())
            .and(with_feed.clone())
            .and(session())
            .and(warp::query::<PaperFilter>())
            .and_then(
                |listing: Listing,
                 feed: Arc<PaperFeed>,
                 session_id: Option<SessionId>,
                 filter: PaperFilter| async move {
                    let authed = authenticate(&feed, session_id)?;
                    let papers = authed
                        .papers(listing, filter)
                        .await
                        .map_err(warp::reject::custom)?;

                    Ok::<_, Rejection>(warp::reply::json(&papers))
                },
            )
    };

    let favorites = {
        let add = warp::path!("api" / "favorites")
            .and(warp::post())
            .and(with_feed.clone())
            .and(session())
            .and(json_body())
            .and_then(
                |feed: Arc<PaperFeed>, session_id: Option<SessionId>, paper: PaperRef| async move {
                    let authed = authenticate(&feed, session_id)?;
                    let added = authed
                        .add_favorite(&paper.paper_id)
                        .await
                        .map_err(warp::reject::custom)?;

                    Ok::<_, Rejection>(warp::reply::json(
                        &json!({ "success": true, "added": added }),
                    ))
                },
            );

        let remove = warp::path!("api" / "favorites")
            .and(warp::delete())
            .and(with_feed.clone())
            .and(session())
            .and(warp::query::<PaperRef>())
            .and_then(
                |feed: Arc<PaperFeed>, session_id: Option<SessionId>, paper: PaperRef| async move {
                    let authed = authenticate(&feed, session_id)?;
                    authed
                        .remove_favorite(&paper.paper_id)
                        .await
                        .map_err(warp::reject::custom)?;

                    Ok::<_, Rejection>(warp::reply::json(&json!({ "success": true })))
                },
            );

        let list = warp::path!("api" / "favorites")
            .and(warp::get())
            .and(with_feed.clone())
            .and(session())
            .and_then(|feed: Arc<PaperFeed>, session_id: Option<SessionId>| async move {
                let authed = authenticate(&feed, session_id)?;
                let papers = authed.favorites().await.map_err(warp::reject::custom)?;

                Ok::<_, Rejection>(warp::reply::json(&papers))
            });

        let check = warp::path!("api" / "favorites" / "check")
            .and(warp::get())
            .and(with_feed.clone())
            .and(session())
            .and(warp::query::<CheckFavorites>())
            .and_then(
                |feed: Arc<PaperFeed>,
                 session_id: Option<SessionId>,
                 query: CheckFavorites| async move {
                    let authed = authenticate(&feed, session_id)?;
                    let ids: Vec<String> = query
                        .ids
                        .split(',')
                        .map(str::trim)
                        .filter(|id| !id.is_empty())
                        .map(String::from)
                        .collect();

                    let favorited = authed
                        .check_favorites(&ids)
                        .await
                        .map_err(warp::reject::custom)?;

                    Ok::<_, Rejection>(warp::reply::json(&json!({ "favorited": favorited })))
                },
            );

        add.or(remove).or(list).or(check)
    };

    let fields = warp::path!("api" / "fields")
        .and(warp::get())
        .map(|| warp::reply::json(&Field::ALL));

    let user = warp::path!("api" / "user")
        .and(warp::get())
        .and(with_feed.clone())
        .and(session())
        .and_then(|feed: Arc<PaperFeed>, session_id: Option<SessionId>| async move {
            let authed = authenticate(&feed, session_id)?;
            let profile = authed.profile().await.map_err(warp::reject::custom)?;

            Ok::<_, Rejection>(warp::reply::json(&profile))
        });

    let check_auth = warp::path!("api" / "check-auth")
        .and(warp::get())
        .and(with_feed)
        .and(session())
        .map(|feed: Arc<PaperFeed>, session_id: Option<SessionId>| {
            let authenticated = authenticate(&feed, session_id).is_ok();
            let status = if authenticated {
                StatusCode::OK
            } else {
                StatusCode::UNAUTHORIZED
            };

            warp::reply::with_status(
                warp::reply::json(&json!({ "authenticated": authenticated })),
                status,
            )
        });

    let statics = match static_dir {
        Some(dir) => warp::get().and(warp::fs::dir(dir)).boxed(),
        None => warp::any()
            .and_then(|| async { Err::<warp::fs::File, Rejection>(warp::reject::not_found()) })
            .boxed(),
    };

    register
        .or(login)
        .or(logout)
        .or(papers)
        .or(favorites)
        .or(fields)
        .or(user)
        .or(check_auth)
        .or(statics)
        .recover(handle_rejection)
        .with(warp::log("paperfeed"))
}

fn json_body<T>() -> impl Filter<Extract = (T,), Error = Rejection> + Clone
where
    T: for<'de> Deserialize<'de> + Send,
{
    warp::body::content_length_limit(MAX_BODY).and(warp::body::json())
}

/// The session named by the request's cookie. A malformed cookie counts as none.
fn session() -> impl Filter<Extract = (Option<SessionId>,), Error = Infallible> + Clone {
    warp::cookie::optional::<String>(SESSION_COOKIE).map(|cookie: Option<String>| {
        cookie.and_then(|value| match value.parse() {
            Ok(id) => Some(id),
            Err(()) => {
                trace!("ignoring malformed session cookie");
                None
            }
        })
    })
}

fn authenticate(
    feed: &Arc<PaperFeed>,
    session_id: Option<SessionId>,
) -> Result<PaperFeedAuthed, Rejection> {
    let session_id = session_id.ok_or_else(|| warp::reject::custom(Error::Unauthenticated))?;

    feed.authenticate(session_id).map_err(warp::reject::custom)
}

fn error_reply(status: StatusCode, message: &str) -> Response {
    warp::reply::with_status(warp::reply::json(&json!({ "error": message })), status)
        .into_response()
}

async fn handle_rejection(err: Rejection) -> Result<Response, Infallible> {
    use warp::filters::body::BodyDeserializeError;
    use warp::reject::{
        InvalidQuery, LengthRequired, MethodNotAllowed, PayloadTooLarge, UnsupportedMediaType,
    };

    let reply = if let Some(e) = err.find::<Error>() {
        error_reply((*e).into(), e.message())
    } else if err.is_not_found() {
        error_reply(StatusCode::NOT_FOUND, "not found")
    } else if let Some(e) = err.find::<BodyDeserializeError>() {
        trace!("bad body: {e}");
        error_reply(StatusCode::BAD_REQUEST, Error::BadRequest.message())
    } else if err.find::<InvalidQuery>().is_some() {
        error_reply(StatusCode::BAD_REQUEST, Error::BadRequest.message())
    } else if err.find::<LengthRequired>().is_some() {
        error_reply(StatusCode::LENGTH_REQUIRED, "content-length required")
    } else if err.find::<PayloadTooLarge>().is_some() {
        error_reply(StatusCode::PAYLOAD_TOO_LARGE, "request too large")
    } else if err.find::<UnsupportedMediaType>().is_some() {
        error_reply(StatusCode::UNSUPPORTED_MEDIA_TYPE, "expected json")
    } else if err.find::<MethodNotAllowed>().is_some() {
        error_reply(StatusCode::METHOD_NOT_ALLOWED, "method not allowed")
    } else {
        error!("unhandled rejection: {err:?}");
        error_reply(StatusCode::INTERNAL_SERVER_ERROR, Error::Internal.message())
    };

    Ok(reply)
}
