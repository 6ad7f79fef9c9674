use chrono::Duration;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use url::Url;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MergeProposalStatus {
    #[serde(rename = "open")]
    Open,
    #[serde(rename = "merged")]
    Merged,
    #[serde(rename = "closed")]
    Closed,
    #[serde(rename = "applied")]
    Applied,
    #[serde(rename = "abandoned")]
    Abandoned,
    #[serde(rename = "rejected")]
    Rejected,
}

impl std::fmt::Display for MergeProposalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let s = match self {
            MergeProposalStatus::Open => "open",
            MergeProposalStatus::Merged => "merged",
            MergeProposalStatus::Closed => "closed",
            MergeProposalStatus::Applied => "applied",
            MergeProposalStatus::Abandoned => "abandoned",
            MergeProposalStatus::Rejected => "rejected",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for MergeProposalStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(MergeProposalStatus::Open),
            "merged" => Ok(MergeProposalStatus::Merged),
            "closed" => Ok(MergeProposalStatus::Closed),
            "applied" => Ok(MergeProposalStatus::Applied),
            "abandoned" => Ok(MergeProposalStatus::Abandoned),
            "rejected" => Ok(MergeProposalStatus::Rejected),
            _ => Err(format!("unknown merge proposal status: {}", s)),
        }
    }
}

impl From<breezyshim::forge::MergeProposalStatus> for MergeProposalStatus {
    fn from(status: breezyshim::forge::MergeProposalStatus) -> Self {
        match status {
            breezyshim::forge::MergeProposalStatus::Open => MergeProposalStatus::Open,
            breezyshim::forge::MergeProposalStatus::Merged => MergeProposalStatus::Merged,
            breezyshim::forge::MergeProposalStatus::Closed => MergeProposalStatus::Closed,
        }
    }
}

#[derive(Serialize, Deserialize)]
pub struct MergeProposalNotification {
    pub url: Url,
    pub web_url: Option<Url>,
    pub rate_limit_bucket: Option<String>,
    pub status: MergeProposalStatus,
    pub merged_by: Option<String>,
    pub merged_by_url: Option<Url>,
    pub merged_at: Option<String>,
    pub codebase: String,
    pub campaign: String,
    pub target_branch_url: Url,
    pub target_branch_web_url: Option<Url>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    #[serde(rename = "skip")]
    Skip,
    #[serde(rename = "build-only")]
    BuildOnly,
    #[serde(rename = "push")]
    Push,
    #[serde(rename = "push-derived")]
    PushDerived,
    #[serde(rename = "propose")]
    Propose,
    #[serde(rename = "attempt-push")]
    AttemptPush,
    #[serde(rename = "bts")]
    Bts,
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let s = match self {
            Mode::Skip => "skip",
            Mode::BuildOnly => "build-only",
            Mode::Push => "push",
            Mode::PushDerived => "push-derived",
            Mode::Propose => "propose",
            Mode::AttemptPush => "attempt-push",
            Mode::Bts => "bts",
        };
        write!(f, "{}", s)
    }
}

fn serialize_duration<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    if let Some(d) = duration {
        serializer.serialize_f64(d.num_seconds() as f64)
    } else {
        serializer.serialize_none()
    }
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    if let Some(d) = Option::<f64>::deserialize(deserializer)? {
        Ok(Some(Duration::seconds(d as i64)))
    } else {
        Ok(None)
    }
}

#[derive(Serialize, Deserialize)]
pub struct PublishNotification {
    pub id: String,
    pub codebase: String,
    pub campaign: String,
    pub proposal_url: Option<Url>,
    pub mode: Mode,
    pub main_branch_url: Option<Url>,
    pub main_branch_web_url: Option<Url>,
    pub branch_name: Option<String>,
    pub result_code: String,
    pub result: serde_json::Value,
    pub run_id: String,
    #[serde(
        serialize_with = "serialize_duration",
        deserialize_with = "deserialize_duration"
    )]
    pub publish_delay: Option<Duration>,
}
