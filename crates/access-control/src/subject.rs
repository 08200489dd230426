//! Who is asking: ordered subject lists derived from an invocation.

use serde::{Deserialize, Serialize};

/// Subject every invocation carries, at the lowest priority.
pub const SUBJECT_ALL: &str = "all";

/// Identity information of one command invocation, as mapped by an adapter.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct InvocationContext {
    /// Adapter/platform name, e.g. `qq` or `telegram`.
    pub platform: String,
    pub user_id: String,
    #[serde(default)]
    pub group_id: Option<String>,
}

impl InvocationContext {
    pub fn private(platform: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            platform: platform.into().to_ascii_lowercase(),
            user_id: user_id.into(),
            group_id: None,
        }
    }

    pub fn group(
        platform: impl Into<String>,
        user_id: impl Into<String>,
        group_id: impl Into<String>,
    ) -> Self {
        Self {
            group_id: Some(group_id.into()),
            ..Self::private(platform, user_id)
        }
    }

    /// Acting identity charged for rate-limit tokens: `platform:user`.
    pub fn user(&self) -> String {
        format!("{}:{}", self.platform, self.user_id)
    }
}

/// Maps an invocation to its subjects, most specific first.
pub trait SubjectExtractor: Send + Sync {
    fn extract_subjects(&self, ctx: &InvocationContext) -> Vec<String>;
}

/// `platform:user`, `platform:g<group>` (group chats only), `platform`, `all`.
#[derive(Clone, Copy, Debug, Default)]
pub struct ChatSubjectExtractor;

impl SubjectExtractor for ChatSubjectExtractor {
    fn extract_subjects(&self, ctx: &InvocationContext) -> Vec<String> {
        let mut subjects = Vec::with_capacity(4);
        subjects.push(ctx.user());
        if let Some(group) = &ctx.group_id {
            subjects.push(format!("{}:g{}", ctx.platform, group));
        }
        subjects.push(ctx.platform.clone());
        subjects.push(SUBJECT_ALL.to_string());
        subjects
    }
}

impl<F> SubjectExtractor for F
where
    F: Fn(&InvocationContext) -> Vec<String> + Send + Sync,
{
    fn extract_subjects(&self, ctx: &InvocationContext) -> Vec<String> {
        self(ctx)
    }
}
