//! Note creation and lookup.

use std::sync::Arc;

use thiserror::Error;

use crate::application::repos::{CreateNoteParams, NotesRepo, NotesWriteRepo, RepoError};
use crate::domain::entities::NoteRecord;
use crate::domain::error::DomainError;
use crate::domain::types::{NoteId, UserId};

const TITLE_MAX_CHARS: usize = 100;

#[derive(Debug, Error)]
pub enum NoteError {
    #[error(transparent)]
    Validation(#[from] DomainError),
    #[error(transparent)]
    Repo(#[from] RepoError),
}

#[derive(Debug, Clone)]
pub struct CreateNoteCommand {
    pub title: String,
    pub content: String,
    pub img_url: Option<String>,
}

#[derive(Clone)]
pub struct NoteService {
    reader: Arc<dyn NotesRepo>,
    writer: Arc<dyn NotesWriteRepo>,
}

impl NoteService {
    pub fn new(reader: Arc<dyn NotesRepo>, writer: Arc<dyn NotesWriteRepo>) -> Self {
        Self { reader, writer }
    }

    pub async fn create(
        &self,
        author: UserId,
        command: CreateNoteCommand,
    ) -> Result<NoteRecord, NoteError> {
        let title = command.title.trim().to_string();
        if title.is_empty() {
            return Err(DomainError::invalid("title", "must not be empty").into());
        }
        if title.chars().count() > TITLE_MAX_CHARS {
            return Err(DomainError::invalid(
                "title",
                format!("must be at most {TITLE_MAX_CHARS} characters"),
            )
            .into());
        }
        if command.content.trim().is_empty() {
            return Err(DomainError::invalid("content", "must not be empty").into());
        }

        let img_url = command
            .img_url
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty());

        let note = self
            .writer
            .create_note(CreateNoteParams {
                author_id: author,
                title,
                content: command.content,
                img_url,
            })
            .await?;
        Ok(note)
    }

    pub async fn find(&self, id: NoteId) -> Result<NoteRecord, NoteError> {
        self.reader
            .find_note(id)
            .await?
            .ok_or_else(|| DomainError::not_found("note").into())
    }
}
