/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - SENSE Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Engagement use cases.
//!
//! [`Engine`] validates input, checks authorization and visibility, clamps
//! pagination and shapes results. Storage work is delegated to the counter
//! model, the query composer and the content writers, one pooled connection
//! per call.

use crate::collab::{
    self, MediaOwnership, StoreMediaOwnership, StoreUserDirectory, UserDirectory,
};
use crate::content;
use crate::counters;
use crate::error::{EngineError, EngineResult};
use crate::predicate::{build, ClauseList, FilterContext};
use crate::query::{self, PageWindow};
use crate::store::{load_publication, publication_access, OpContext, Store};
use sense_protocol::{
    Comment, CommentView, FeedFilters, Liker, MediaAsset, NewComment, NewMedia, NewPublication,
    Page, Publication, PublicationPatch, PublicationView, ReconcileReport, SavedPublication,
    ToggleOutcome, UserStats, UserSummary,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const TITLE_MAX_CHARS: usize = 500;
pub const CONTENT_MAX_CHARS: usize = 10_000;
pub const SOURCE_MAX_CHARS: usize = 200;
pub const COMMENT_MAX_CHARS: usize = 2_000;

#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub default_page_limit: u32,
    pub max_page_limit: u32,
    /// Deadline applied by [`Engine::op_context`]. `None` disables it.
    pub op_timeout: Option<Duration>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            default_page_limit: 20,
            max_page_limit: 100,
            op_timeout: Some(Duration::from_secs(10)),
        }
    }
}

/// Raw pagination input. Missing or out-of-range values are clamped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageRequest {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl PageRequest {
    pub fn new(limit: i64, offset: i64) -> Self {
        Self {
            limit: Some(limit),
            offset: Some(offset),
        }
    }
}

#[derive(Clone)]
pub struct Engine {
    store: Store,
    media: Arc<dyn MediaOwnership>,
    users: Arc<dyn UserDirectory>,
    opts: EngineOptions,
}

impl Engine {
    /// Engine whose collaborators read the same store.
    pub fn new(store: Store, opts: EngineOptions) -> Self {
        let media = Arc::new(StoreMediaOwnership::new(store.clone()));
        let users = Arc::new(StoreUserDirectory::new(store.clone()));
        Self::with_collaborators(store, opts, media, users)
    }

    pub fn with_collaborators(
        store: Store,
        opts: EngineOptions,
        media: Arc<dyn MediaOwnership>,
        users: Arc<dyn UserDirectory>,
    ) -> Self {
        let max = opts.max_page_limit.max(1);
        let opts = EngineOptions {
            max_page_limit: max,
            default_page_limit: opts.default_page_limit.clamp(1, max),
            ..opts
        };
        Self {
            store,
            media,
            users,
            opts,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn options(&self) -> &EngineOptions {
        &self.opts
    }

    /// Fresh context carrying the configured per-operation deadline.
    pub fn op_context(&self) -> OpContext {
        match self.opts.op_timeout {
            Some(t) => OpContext::with_timeout(t),
            None => OpContext::background(),
        }
    }

    pub fn clamp_page(&self, page: PageRequest) -> PageWindow {
        let limit = match page.limit {
            Some(l) if l > 0 => l.min(i64::from(self.opts.max_page_limit)) as u32,
            _ => self.opts.default_page_limit,
        };
        let offset = page.offset.unwrap_or(0).clamp(0, i64::from(u32::MAX)) as u32;
        PageWindow { limit, offset }
    }

    // ---- publications ----

    pub async fn create_publication(
        &self,
        ctx: &OpContext,
        author_id: &str,
        mut req: NewPublication,
    ) -> EngineResult<Publication> {
        require_id(author_id, "author id")?;
        check_len("title", req.title.as_deref(), TITLE_MAX_CHARS)?;
        check_len("content", req.content.as_deref(), CONTENT_MAX_CHARS)?;
        check_len("source", req.source.as_deref(), SOURCE_MAX_CHARS)?;
        req.media_ids = dedup(req.media_ids);
        self.require_media_owned(ctx, &req.media_ids, author_id).await?;

        let author = author_id.to_string();
        let publication = self
            .store
            .run(ctx, move |conn| content::insert_publication(conn, &author, &req))
            .await?;
        info!(
            publication_id = %publication.id,
            author_id = %publication.author_id,
            kind = publication.kind.as_str(),
            visibility = publication.visibility.as_str(),
            "publication created"
        );
        Ok(publication)
    }

    pub async fn get_publication(
        &self,
        ctx: &OpContext,
        publication_id: &str,
        viewer: Option<&str>,
    ) -> EngineResult<PublicationView> {
        let viewer = non_blank(viewer);
        let id = publication_id.to_string();
        let publication = self
            .store
            .run(ctx, move |conn| Ok(load_publication(conn, &id)?))
            .await?
            .filter(|p| p.visibility.allows(&p.author_id, viewer))
            .ok_or_else(|| EngineError::not_found("publication"))?;

        let (is_liked, is_saved) = match viewer {
            Some(v) => (
                self.viewer_flag(ctx, &publication.id, v, query::is_liked, "like").await,
                self.viewer_flag(ctx, &publication.id, v, query::is_saved, "save").await,
            ),
            None => (false, false),
        };
        Ok(PublicationView {
            publication,
            is_liked,
            is_saved,
        })
    }

    /// Status lookups degrade to `false` rather than failing the read.
    async fn viewer_flag(
        &self,
        ctx: &OpContext,
        publication_id: &str,
        viewer: &str,
        lookup: fn(&rusqlite::Connection, &str, &str) -> rusqlite::Result<bool>,
        what: &'static str,
    ) -> bool {
        let id = publication_id.to_string();
        let user = viewer.to_string();
        match self
            .store
            .run(ctx, move |conn| Ok(lookup(conn, &id, &user)?))
            .await
        {
            Ok(v) => v,
            Err(e) => {
                warn!(publication_id, viewer, status = what, error = %e, "status lookup failed");
                false
            }
        }
    }

    pub async fn update_publication(
        &self,
        ctx: &OpContext,
        publication_id: &str,
        caller_id: &str,
        mut patch: PublicationPatch,
    ) -> EngineResult<Publication> {
        require_id(caller_id, "caller id")?;
        check_len("title", patch.title.as_deref(), TITLE_MAX_CHARS)?;
        check_len("content", patch.content.as_deref(), CONTENT_MAX_CHARS)?;
        check_len("source", patch.source.as_deref(), SOURCE_MAX_CHARS)?;

        let id = publication_id.to_string();
        let access = self
            .store
            .run(ctx, move |conn| Ok(publication_access(conn, &id)?))
            .await?;
        match access {
            None => return Err(EngineError::not_found("publication")),
            Some((author, _)) if author != caller_id => {
                return Err(EngineError::NotAuthor {
                    entity: "publication",
                })
            }
            Some(_) => {}
        }
        if let Some(ids) = patch.media_ids.take() {
            let ids = dedup(ids);
            self.require_media_owned(ctx, &ids, caller_id).await?;
            patch.media_ids = Some(ids);
        }

        let id = publication_id.to_string();
        let caller = caller_id.to_string();
        let updated = self
            .store
            .run(ctx, move |conn| content::update_publication(conn, &id, &caller, &patch))
            .await?;
        info!(publication_id, "publication updated");
        Ok(updated)
    }

    pub async fn delete_publication(&self, ctx: &OpContext, publication_id: &str, caller_id: &str) -> EngineResult<()> {
        require_id(caller_id, "caller id")?;
        let id = publication_id.to_string();
        let caller = caller_id.to_string();
        self.store
            .run(ctx, move |conn| content::delete_publication(conn, &id, &caller))
            .await?;
        info!(publication_id, "publication deleted");
        Ok(())
    }

    async fn require_media_owned(&self, ctx: &OpContext, media_ids: &[String], owner: &str) -> EngineResult<()> {
        for media_id in media_ids {
            if !self.media.is_owned_by(ctx, media_id, owner).await? {
                return Err(EngineError::MediaNotOwned {
                    media_id: media_id.clone(),
                });
            }
        }
        Ok(())
    }

    // ---- likes & saves ----

    /// Not idempotent: every call flips the state.
    pub async fn toggle_like(&self, ctx: &OpContext, publication_id: &str, user_id: &str) -> EngineResult<ToggleOutcome> {
        require_id(user_id, "user id")?;
        let id = publication_id.to_string();
        let user = user_id.to_string();
        let outcome = self
            .store
            .run(ctx, move |conn| counters::toggle_publication_like(conn, &id, &user))
            .await?;
        debug!(publication_id, user_id, liked = outcome.liked, count = outcome.count, "like toggled");
        Ok(outcome)
    }

    pub async fn toggle_comment_like(&self, ctx: &OpContext, comment_id: &str, user_id: &str) -> EngineResult<ToggleOutcome> {
        require_id(user_id, "user id")?;
        let id = comment_id.to_string();
        let user = user_id.to_string();
        let outcome = self
            .store
            .run(ctx, move |conn| counters::toggle_comment_like(conn, &id, &user))
            .await?;
        debug!(comment_id, user_id, liked = outcome.liked, "comment like toggled");
        Ok(outcome)
    }

    pub async fn save(
        &self,
        ctx: &OpContext,
        publication_id: &str,
        user_id: &str,
        note: Option<&str>,
    ) -> EngineResult<()> {
        require_id(user_id, "user id")?;
        let id = publication_id.to_string();
        let user = user_id.to_string();
        let note = note.map(str::to_string);
        let inserted = self
            .store
            .run(ctx, move |conn| counters::save(conn, &id, &user, note.as_deref()))
            .await?;
        debug!(publication_id, user_id, inserted, "publication saved");
        Ok(())
    }

    /// Removing something that was never saved succeeds without effect.
    pub async fn unsave(&self, ctx: &OpContext, publication_id: &str, user_id: &str) -> EngineResult<()> {
        require_id(user_id, "user id")?;
        let id = publication_id.to_string();
        let user = user_id.to_string();
        self.store
            .run(ctx, move |conn| counters::unsave(conn, &id, &user))
            .await?;
        Ok(())
    }

    // ---- listings ----

    pub async fn get_feed(
        &self,
        ctx: &OpContext,
        viewer: Option<&str>,
        filters: FeedFilters,
        page: PageRequest,
    ) -> EngineResult<Page<PublicationView>> {
        self.list_publications(ctx, FilterContext::new(viewer, filters), page)
            .await
    }

    pub async fn get_author_timeline(
        &self,
        ctx: &OpContext,
        author_id: &str,
        viewer: Option<&str>,
        filters: FeedFilters,
        page: PageRequest,
    ) -> EngineResult<Page<PublicationView>> {
        require_id(author_id, "author id")?;
        let fctx = FilterContext::new(viewer, filters).pin_author(author_id);
        self.list_publications(ctx, fctx, page).await
    }

    pub async fn search(
        &self,
        ctx: &OpContext,
        text: &str,
        viewer: Option<&str>,
        filters: FeedFilters,
        page: PageRequest,
    ) -> EngineResult<Page<PublicationView>> {
        if text.trim().is_empty() {
            return Err(EngineError::validation("search query is required"));
        }
        let fctx = FilterContext::new(viewer, filters).with_text(text);
        self.list_publications(ctx, fctx, page).await
    }

    async fn list_publications(
        &self,
        ctx: &OpContext,
        fctx: FilterContext,
        page: PageRequest,
    ) -> EngineResult<Page<PublicationView>> {
        let window = self.clamp_page(page);
        let clauses = ClauseList::from_predicates("p", &build(&fctx));
        let viewer = fctx.viewer;
        let (total, items) = self
            .store
            .run(ctx, move |conn| {
                Ok(query::publications(conn, viewer.as_deref(), &clauses, window)?)
            })
            .await?;
        Ok(page_of(items, total, window))
    }

    /// The user's saved items, filtered by what the user can currently see.
    pub async fn get_saved(
        &self,
        ctx: &OpContext,
        user_id: &str,
        filters: FeedFilters,
        page: PageRequest,
    ) -> EngineResult<Page<SavedPublication>> {
        require_id(user_id, "user id")?;
        let window = self.clamp_page(page);
        let clauses = ClauseList::from_predicates("p", &build(&FilterContext::new(Some(user_id), filters)));
        let user = user_id.to_string();
        let (total, items) = self
            .store
            .run(ctx, move |conn| Ok(query::saved(conn, &user, &clauses, window)?))
            .await?;
        Ok(page_of(items, total, window))
    }

    pub async fn liked_users(
        &self,
        ctx: &OpContext,
        publication_id: &str,
        viewer: Option<&str>,
        page: PageRequest,
    ) -> EngineResult<Page<Liker>> {
        let window = self.clamp_page(page);
        let id = publication_id.to_string();
        let viewer = non_blank(viewer).map(str::to_string);
        let (total, items) = self
            .store
            .run(ctx, move |conn| {
                require_visible(conn, &id, viewer.as_deref())?;
                Ok(query::liked_users(conn, &id, window)?)
            })
            .await?;
        Ok(page_of(items, total, window))
    }

    // ---- comments ----

    /// Creates a top-level comment, or a reply when `req.parent_id` is set.
    pub async fn create_comment(
        &self,
        ctx: &OpContext,
        publication_id: &str,
        author_id: &str,
        req: NewComment,
    ) -> EngineResult<Comment> {
        require_id(author_id, "author id")?;
        let text = comment_text(&req.text)?;
        let id = publication_id.to_string();
        let author = author_id.to_string();
        let parent = non_blank(req.parent_id.as_deref()).map(str::to_string);
        let comment = self
            .store
            .run(ctx, move |conn| {
                counters::insert_comment(conn, &id, &author, &text, parent.as_deref())
            })
            .await?;
        info!(
            comment_id = %comment.id,
            publication_id = %comment.publication_id,
            reply = comment.parent_id.is_some(),
            "comment created"
        );
        Ok(comment)
    }

    pub async fn reply_to_comment(
        &self,
        ctx: &OpContext,
        parent_id: &str,
        author_id: &str,
        text: &str,
    ) -> EngineResult<Comment> {
        let pid = parent_id.to_string();
        let parent = self
            .store
            .run(ctx, move |conn| Ok(query::load_comment(conn, &pid)?))
            .await?
            .ok_or_else(|| EngineError::not_found("comment"))?;
        let req = NewComment {
            text: text.to_string(),
            parent_id: Some(parent.id),
        };
        self.create_comment(ctx, &parent.publication_id, author_id, req)
            .await
    }

    pub async fn update_comment(
        &self,
        ctx: &OpContext,
        comment_id: &str,
        caller_id: &str,
        text: &str,
    ) -> EngineResult<Comment> {
        require_id(caller_id, "caller id")?;
        let text = comment_text(text)?;
        let id = comment_id.to_string();
        let caller = caller_id.to_string();
        self.store
            .run(ctx, move |conn| content::update_comment(conn, &id, &caller, &text))
            .await
    }

    pub async fn get_comment(&self, ctx: &OpContext, comment_id: &str, viewer: Option<&str>) -> EngineResult<CommentView> {
        let id = comment_id.to_string();
        let viewer = non_blank(viewer).map(str::to_string);
        self.store
            .run(ctx, move |conn| {
                let view = query::comment_view(conn, &id, viewer.as_deref())?
                    .ok_or_else(|| EngineError::not_found("comment"))?;
                require_visible(conn, &view.comment.publication_id, viewer.as_deref())
                    .map_err(|e| if e.is_not_found() { EngineError::not_found("comment") } else { e })?;
                Ok(view)
            })
            .await
    }

    pub async fn delete_comment(&self, ctx: &OpContext, comment_id: &str, caller_id: &str) -> EngineResult<()> {
        require_id(caller_id, "caller id")?;
        let id = comment_id.to_string();
        let caller = caller_id.to_string();
        let removed = self
            .store
            .run(ctx, move |conn| counters::delete_comment(conn, &id, &caller))
            .await?;
        info!(comment_id, removed, "comment deleted");
        Ok(())
    }

    /// Top-level comments of a publication, oldest first.
    pub async fn list_comments(
        &self,
        ctx: &OpContext,
        publication_id: &str,
        viewer: Option<&str>,
        page: PageRequest,
    ) -> EngineResult<Page<CommentView>> {
        let window = self.clamp_page(page);
        let id = publication_id.to_string();
        let viewer = non_blank(viewer).map(str::to_string);
        let (total, items) = self
            .store
            .run(ctx, move |conn| {
                require_visible(conn, &id, viewer.as_deref())?;
                Ok(query::comments(conn, &id, None, viewer.as_deref(), window)?)
            })
            .await?;
        Ok(page_of(items, total, window))
    }

    pub async fn list_replies(
        &self,
        ctx: &OpContext,
        comment_id: &str,
        viewer: Option<&str>,
        page: PageRequest,
    ) -> EngineResult<Page<CommentView>> {
        let window = self.clamp_page(page);
        let id = comment_id.to_string();
        let viewer = non_blank(viewer).map(str::to_string);
        let (total, items) = self
            .store
            .run(ctx, move |conn| {
                let parent = query::load_comment(conn, &id)?
                    .ok_or_else(|| EngineError::not_found("comment"))?;
                require_visible(conn, &parent.publication_id, viewer.as_deref())
                    .map_err(|e| if e.is_not_found() { EngineError::not_found("comment") } else { e })?;
                Ok(query::comments(
                    conn,
                    &parent.publication_id,
                    Some(&parent.id),
                    viewer.as_deref(),
                    window,
                )?)
            })
            .await?;
        Ok(page_of(items, total, window))
    }

    // ---- social graph ----

    pub async fn follow(&self, ctx: &OpContext, follower_id: &str, following_id: &str) -> EngineResult<()> {
        require_id(follower_id, "follower id")?;
        require_id(following_id, "user id")?;
        if follower_id == following_id {
            return Err(EngineError::validation("cannot follow yourself"));
        }
        if !self.users.user_exists(ctx, following_id).await? {
            return Err(EngineError::not_found("user"));
        }
        let follower = follower_id.to_string();
        let following = following_id.to_string();
        let inserted = self
            .store
            .run(ctx, move |conn| counters::follow(conn, &follower, &following))
            .await?;
        debug!(follower_id, following_id, inserted, "follow");
        Ok(())
    }

    pub async fn unfollow(&self, ctx: &OpContext, follower_id: &str, following_id: &str) -> EngineResult<()> {
        require_id(follower_id, "follower id")?;
        let follower = follower_id.to_string();
        let following = following_id.to_string();
        let removed = self
            .store
            .run(ctx, move |conn| counters::unfollow(conn, &follower, &following))
            .await?;
        debug!(follower_id, following_id, removed, "unfollow");
        Ok(())
    }

    pub async fn is_following(&self, ctx: &OpContext, follower_id: &str, following_id: &str) -> EngineResult<bool> {
        let follower = follower_id.to_string();
        let following = following_id.to_string();
        self.store
            .run(ctx, move |conn| Ok(query::is_following(conn, &follower, &following)?))
            .await
    }

    pub async fn user_stats(&self, ctx: &OpContext, user_id: &str) -> EngineResult<UserStats> {
        let id = user_id.to_string();
        self.store
            .run(ctx, move |conn| Ok(query::user_stats(conn, &id)?))
            .await?
            .ok_or_else(|| EngineError::not_found("user"))
    }

    pub async fn register_user(&self, ctx: &OpContext, user_id: &str, username: &str) -> EngineResult<UserSummary> {
        require_id(user_id, "user id")?;
        if username.trim().is_empty() {
            return Err(EngineError::validation("username is required"));
        }
        let id = user_id.to_string();
        let name = username.trim().to_string();
        self.store
            .run(ctx, move |conn| collab::insert_user(conn, &id, &name))
            .await
    }

    // ---- media registry ----

    pub async fn register_media(&self, ctx: &OpContext, owner_id: &str, req: NewMedia) -> EngineResult<MediaAsset> {
        require_id(owner_id, "owner id")?;
        if req.mime.trim().is_empty() {
            return Err(EngineError::validation("mime is required"));
        }
        let owner = owner_id.to_string();
        let asset = self
            .store
            .run(ctx, move |conn| {
                Ok(collab::insert_media(conn, &owner, req.mime.trim(), req.filename.as_deref())?)
            })
            .await?;
        info!(media_id = %asset.id, owner_id, mime = %asset.mime, "media registered");
        Ok(asset)
    }

    pub async fn get_media(&self, ctx: &OpContext, media_id: &str) -> EngineResult<MediaAsset> {
        let id = media_id.to_string();
        self.store
            .run(ctx, move |conn| Ok(collab::load_media(conn, &id)?))
            .await?
            .ok_or_else(|| EngineError::not_found("media"))
    }

    pub async fn delete_media(&self, ctx: &OpContext, media_id: &str, caller_id: &str) -> EngineResult<()> {
        require_id(caller_id, "caller id")?;
        let id = media_id.to_string();
        let caller = caller_id.to_string();
        self.store
            .run(ctx, move |conn| collab::delete_media(conn, &id, &caller))
            .await?;
        info!(media_id, "media deleted");
        Ok(())
    }

    // ---- maintenance ----

    pub async fn reconcile_counters(&self, ctx: &OpContext) -> EngineResult<ReconcileReport> {
        let report = self.store.run(ctx, counters::reconcile).await?;
        if report == ReconcileReport::default() {
            debug!("counters consistent");
        } else {
            warn!(
                publications = report.publications_fixed,
                comments = report.comments_fixed,
                users = report.users_fixed,
                "counter drift repaired"
            );
        }
        Ok(report)
    }
}

fn require_visible(conn: &rusqlite::Connection, publication_id: &str, viewer: Option<&str>) -> EngineResult<()> {
    match publication_access(conn, publication_id)? {
        Some((author, vis)) if vis.allows(&author, viewer) => Ok(()),
        _ => Err(EngineError::not_found("publication")),
    }
}

fn page_of<T>(items: Vec<T>, total: u64, window: PageWindow) -> Page<T> {
    Page {
        items,
        total,
        limit: window.limit,
        offset: window.offset,
    }
}

fn non_blank(v: Option<&str>) -> Option<&str> {
    v.filter(|s| !s.trim().is_empty())
}

fn require_id(value: &str, what: &str) -> EngineResult<()> {
    if value.trim().is_empty() {
        return Err(EngineError::validation(format!("{what} is required")));
    }
    Ok(())
}

fn check_len(field: &str, value: Option<&str>, max: usize) -> EngineResult<()> {
    match value {
        Some(v) if v.chars().count() > max => Err(EngineError::validation(format!(
            "{field} exceeds {max} characters"
        ))),
        _ => Ok(()),
    }
}

fn comment_text(raw: &str) -> EngineResult<String> {
    let text = raw.trim();
    if text.is_empty() {
        return Err(EngineError::validation("comment text is required"));
    }
    check_len("text", Some(text), COMMENT_MAX_CHARS)?;
    Ok(text.to_string())
}

fn dedup(ids: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(ids.len());
    for id in ids {
        if !out.contains(&id) {
            out.push(id);
        }
    }
    out
}
