use std::collections::HashSet;
use std::sync::Arc;

use crate::application::follows::FollowService;
use crate::application::likes::LikeService;
use crate::application::notes::NoteService;
use crate::application::repos::HealthRepo;
use crate::domain::types::UserId;

#[derive(Clone)]
pub struct ApiState {
    pub notes: Arc<NoteService>,
    pub likes: Arc<LikeService>,
    pub follows: Arc<FollowService>,
    pub health: Arc<dyn HealthRepo>,
    pub admins: Arc<HashSet<UserId>>,
}
