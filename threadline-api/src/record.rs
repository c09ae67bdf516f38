use serde::{Deserialize, Deserializer};

use crate::{CommentId, DocPath, Error, ReplyId, Time, UserId};

pub type Fields = serde_json::Map<String, serde_json::Value>;

pub const LIKES_COUNT: &str = "likesCount";
pub const REPLIES_COUNT: &str = "repliesCount";

#[derive(Clone, Debug, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Document {
    pub path: DocPath,
    pub fields: Fields,
}

impl Document {
    pub fn new(path: DocPath, fields: Fields) -> Document {
        Document { path, fields }
    }

    /// Deserialize the fields, with the document id available as the `id` field
    fn decode<T>(&self) -> Result<T, Error>
    where
        T: for<'de> serde::Deserialize<'de>,
    {
        let mut fields = self.fields.clone();
        if let Some(id) = self.path.id() {
            fields.insert(String::from("id"), serde_json::Value::from(id));
        }
        serde_json::from_value(serde_json::Value::Object(fields))
            .map_err(|err| Error::decode(&self.path, err))
    }
}

fn encode<T: serde::Serialize>(value: &T) -> Fields {
    match serde_json::to_value(value) {
        Ok(serde_json::Value::Object(fields)) => fields,
        // derived Serialize impls of structs always yield objects
        _ => Fields::new(),
    }
}

/// Counters are adjusted by increments and may transiently go below zero remotely
fn non_negative<'de, D>(d: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let v = i64::deserialize(d)?;
    Ok(v.max(0) as u64)
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    #[serde(skip_serializing)]
    pub id: CommentId,
    pub author_id: UserId,
    #[serde(default)]
    pub author_name: String,
    pub text: String,
    pub created_at: Time,
    #[serde(default, deserialize_with = "non_negative")]
    pub likes_count: u64,
    #[serde(default, deserialize_with = "non_negative")]
    pub replies_count: u64,
}

impl Comment {
    pub fn from_document(doc: &Document) -> Result<Comment, Error> {
        doc.decode()
    }

    pub fn to_fields(&self) -> Fields {
        encode(self)
    }
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Reply {
    #[serde(skip_serializing)]
    pub id: ReplyId,
    pub author_id: UserId,
    #[serde(default)]
    pub author_name: String,
    pub text: String,
    pub created_at: Time,
    #[serde(default, deserialize_with = "non_negative")]
    pub likes_count: u64,

    /// Reply this one answers, `None` for replies made directly to the comment
    #[serde(default)]
    pub parent_reply_id: Option<ReplyId>,
}

impl Reply {
    pub fn from_document(doc: &Document) -> Result<Reply, Error> {
        doc.decode()
    }

    pub fn to_fields(&self) -> Fields {
        encode(self)
    }

    pub fn is_root(&self) -> bool {
        self.parent_reply_id.is_none()
    }
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LikeRecord {
    pub user_id: UserId,
    pub created_at: Time,
}

impl LikeRecord {
    pub fn to_fields(&self) -> Fields {
        encode(self)
    }
}
