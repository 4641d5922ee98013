//! The two smart-HTTP services and their wire-level constants.

use crate::events::OpKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GitService {
    UploadPack,
    ReceivePack,
}

impl GitService {
    /// Parse the `service` query value / RPC action (`git-upload-pack`,
    /// `git-receive-pack`).
    pub fn from_query(value: &str) -> Option<Self> {
        match value {
            "git-upload-pack" => Some(GitService::UploadPack),
            "git-receive-pack" => Some(GitService::ReceivePack),
            _ => None,
        }
    }

    /// Service name without the `git-` prefix; also the git subcommand.
    pub fn name(&self) -> &'static str {
        match self {
            GitService::UploadPack => "upload-pack",
            GitService::ReceivePack => "receive-pack",
        }
    }

    pub fn advertisement_content_type(&self) -> &'static str {
        match self {
            GitService::UploadPack => "application/x-git-upload-pack-advertisement",
            GitService::ReceivePack => "application/x-git-receive-pack-advertisement",
        }
    }

    pub fn result_content_type(&self) -> &'static str {
        match self {
            GitService::UploadPack => "application/x-git-upload-pack-result",
            GitService::ReceivePack => "application/x-git-receive-pack-result",
        }
    }

    /// Pushes arrive over receive-pack; everything else is a fetch.
    pub fn op_kind(&self) -> OpKind {
        match self {
            GitService::UploadPack => OpKind::Fetch,
            GitService::ReceivePack => OpKind::Push,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_services_only() {
        assert_eq!(
            GitService::from_query("git-upload-pack"),
            Some(GitService::UploadPack)
        );
        assert_eq!(
            GitService::from_query("git-receive-pack"),
            Some(GitService::ReceivePack)
        );
        assert_eq!(GitService::from_query("upload-pack"), None);
        assert_eq!(GitService::from_query("git-frobnicate"), None);
    }

    #[test]
    fn content_types_follow_service_name() {
        assert_eq!(
            GitService::UploadPack.advertisement_content_type(),
            "application/x-git-upload-pack-advertisement"
        );
        assert_eq!(
            GitService::ReceivePack.result_content_type(),
            "application/x-git-receive-pack-result"
        );
    }

    #[test]
    fn receive_pack_is_a_push() {
        assert_eq!(GitService::ReceivePack.op_kind(), OpKind::Push);
        assert_eq!(GitService::UploadPack.op_kind(), OpKind::Fetch);
    }
}
