use async_trait::async_trait;

use crate::application::repos::{FollowInsert, FollowsWriteRepo, NewFollow, RepoError};

use super::{PostgresRepositories, map_sqlx_error};

#[async_trait]
impl FollowsWriteRepo for PostgresRepositories {
    async fn create_follow(&self, follow: NewFollow) -> Result<FollowInsert, RepoError> {
        let result = sqlx::query(
            r#"
            INSERT INTO follows (follower_id, followed_id)
            VALUES ($1, $2)
            ON CONFLICT (follower_id, followed_id) DO NOTHING
            "#,
        )
        .bind(follow.follower_id.get())
        .bind(follow.followed_id.get())
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            Ok(FollowInsert::AlreadyExists)
        } else {
            Ok(FollowInsert::Created)
        }
    }
}
