// src/error.rs

use thiserror::Error;

/// このクレートで起きるエラーの種類だよ。
///
/// 死んだエンティティへの操作とか、無いイベントの unbind とかはエラーにしない！
/// そういうのは黙って何もしないのがこのランタイムの約束。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// 登録にも動的解決にも見つからなかったコンポーネント。
    #[error("the component \"{0}\" does not exist")]
    ComponentNotFound(String),

    /// 登録にも動的解決にも見つからなかったシーン。
    #[error("the scene \"{0}\" does not exist")]
    SceneNotFound(String),

    /// 呼び出しの形がおかしい (キーが空、initialize が無い、など)。その場ですぐ返す。
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// init / initialize フックが失敗を報告した。
    #[error("hook failed: {0}")]
    Hook(String),
}

impl Error {
    /// NotFound 系かどうか。ベストエフォートな合成で握りつぶしていいのはこれだけ。
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::ComponentNotFound(_) | Error::SceneNotFound(_))
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_missing_object() {
        assert_eq!(
            Error::ComponentNotFound("Sprite".into()).to_string(),
            "the component \"Sprite\" does not exist"
        );
        assert_eq!(
            Error::SceneNotFound("Title".into()).to_string(),
            "the scene \"Title\" does not exist"
        );
    }

    #[test]
    fn only_lookup_failures_count_as_not_found() {
        assert!(Error::ComponentNotFound("A".into()).is_not_found());
        assert!(Error::SceneNotFound("B".into()).is_not_found());
        assert!(!Error::InvalidArgument("x".into()).is_not_found());
        assert!(!Error::Hook("boom".into()).is_not_found());
    }
}
