//! SNS topic checks.

use cloudsweep_core::{CheckMeta, RegionalRule, Severity, Verdict};
use serde_json::Value as Json;

pub static TOPIC_ENCRYPTED: CheckMeta = CheckMeta {
    id: "topicEncrypted",
    title: "SNS Topic Encrypted",
    category: "SNS",
    description: "Ensures that Amazon SNS topics enforce Server-Side Encryption (SSE)",
    more_info: "SNS topics should enforce Server-Side Encryption (SSE) to secure data at rest. \
                SSE protects the contents of messages in Amazon SNS topics using keys managed in \
                AWS Key Management Service (AWS KMS).",
    recommended_action: "Enable Server-Side Encryption to protect the content of SNS topic messages.",
    link: "https://docs.aws.amazon.com/sns/latest/dg/sns-server-side-encryption.html",
    apis: &["SNS:listTopics", "SNS:getTopicAttributes"],
};

/// KMS key configured on a topic, if any. Whitespace-only or non-string
/// values count as no key.
pub fn kms_master_key_id(attributes: &Json) -> Option<&str> {
    attributes
        .get("Attributes")?
        .get("KmsMasterKeyId")?
        .as_str()
        .map(str::trim)
        .filter(|k| !k.is_empty())
}

/// Any key id is accepted; whether it is AWS managed or customer managed
/// is not inspected.
pub fn encryption_severity(attributes: &Json) -> Severity {
    if kms_master_key_id(attributes).is_some() {
        Severity::Ok
    } else {
        Severity::Fail
    }
}

pub struct TopicEncrypted;

impl RegionalRule for TopicEncrypted {
    fn meta(&self) -> &'static CheckMeta {
        &TOPIC_ENCRYPTED
    }

    fn family(&self) -> &'static str {
        "sns"
    }

    fn list_operation(&self) -> &'static str {
        "listTopics"
    }

    fn detail_operation(&self) -> &'static str {
        "getTopicAttributes"
    }

    fn resources_noun(&self) -> &'static str {
        "SNS topics"
    }

    fn details_noun(&self) -> &'static str {
        "SNS topic attributes"
    }

    fn resource_id(&self, item: &Json) -> Option<String> {
        item.get("TopicArn")
            .and_then(Json::as_str)
            .filter(|arn| !arn.is_empty())
            .map(str::to_owned)
    }

    fn evaluate(&self, detail: &Json) -> Verdict {
        match encryption_severity(detail) {
            Severity::Ok => Verdict::new(Severity::Ok, "Server-Side Encryption is enabled for SNS topic"),
            sev => Verdict::new(sev, "Server-Side Encryption is not enabled for SNS topic"),
        }
    }
}
