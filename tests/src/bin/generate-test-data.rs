use anyhow::Context;
use chrono::{Duration, Utc};
use rand::{seq::SliceRandom, Rng};
use threadline_api::{
    Comment, CommentId, Document, LikeRecord, PostId, Reply, ReplyId, StoreLayout, SubjectId, Time,
    UserId,
};
use threadline_mock_server::StoreDump;
use uuid::Uuid;

const NUM_USERS: usize = 8;

const NUM_COMMENTS: usize = 20;
const MAX_REPLIES_PER_COMMENT: usize = 25;

// chance for a reply to answer an earlier reply rather than the comment
const NESTING_PROBABILITY: f64 = 0.6;
const LIKE_PROBABILITY: f64 = 0.3;

const TEXT_WORD_COUNT: usize = 12;

struct Generator<R> {
    rng: R,
    layout: StoreLayout,
    post: PostId,
    users: Vec<(UserId, String)>,
    documents: Vec<Document>,
}

impl<R: Rng> Generator<R> {
    fn user(&mut self) -> (UserId, String) {
        self.users
            .choose(&mut self.rng)
            .cloned()
            .unwrap_or_else(|| (UserId::stub(), String::from("stub")))
    }

    fn text(&mut self) -> String {
        lipsum::lipsum_words(self.rng.gen_range(1..=TEXT_WORD_COUNT))
    }

    fn later_than(&mut self, t: Time) -> Time {
        t + Duration::seconds(self.rng.gen_range(1..3600))
    }

    fn push(&mut self, path: threadline_api::DocPath, fields: threadline_api::Fields) {
        self.documents.push(Document::new(path, fields));
    }

    /// Like records from a random subset of users, returning how many were made
    fn likes(&mut self, subject: &SubjectId, since: Time) -> u64 {
        let users = self.users.clone();
        let mut count = 0;
        for (user, _) in users {
            if !self.rng.gen_bool(LIKE_PROBABILITY) {
                continue;
            }
            let like = LikeRecord {
                user_id: user,
                created_at: self.later_than(since),
            };
            let path = self.layout.like(self.post, subject, user);
            self.push(path, like.to_fields());
            count += 1;
        }
        count
    }

    fn replies(&mut self, comment: CommentId, since: Time) -> u64 {
        let num_replies = self.rng.gen_range(0..=MAX_REPLIES_PER_COMMENT);
        let mut made: Vec<(ReplyId, Time)> = Vec::with_capacity(num_replies);
        for _ in 0..num_replies {
            let parent = match made.is_empty() || !self.rng.gen_bool(NESTING_PROBABILITY) {
                true => None,
                false => made.choose(&mut self.rng).copied(),
            };
            let created_at = self.later_than(parent.map_or(since, |(_, t)| t));
            let (author_id, author_name) = self.user();
            let id = ReplyId(Uuid::new_v4());
            let subject = SubjectId::Reply { comment, reply: id };
            let reply = Reply {
                id,
                author_id,
                author_name,
                text: self.text(),
                created_at,
                likes_count: self.likes(&subject, created_at),
                parent_reply_id: parent.map(|(p, _)| p),
            };
            let path = self.layout.reply(self.post, comment, id);
            self.push(path, reply.to_fields());
            made.push((id, created_at));
        }
        made.len() as u64
    }

    fn comment(&mut self, created_at: Time) {
        let id = CommentId(Uuid::new_v4());
        let (author_id, author_name) = self.user();
        let mut comment = Comment {
            id,
            author_id,
            author_name,
            text: self.text(),
            created_at,
            likes_count: 0,
            replies_count: 0,
        };
        comment.likes_count = self.likes(&SubjectId::Comment(id), created_at);
        comment.replies_count = self.replies(id, created_at);
        let path = self.layout.comment(self.post, id);
        self.push(path, comment.to_fields());
    }
}

fn main() -> anyhow::Result<()> {
    let mut rng = rand::thread_rng();
    let users = (0..NUM_USERS)
        .map(|_| {
            let name = lipsum::lipsum_words(1).to_lowercase();
            (UserId(Uuid::new_v4()), name)
        })
        .collect();
    let post = PostId(Uuid::new_v4());
    let start = Utc::now() - Duration::days(rng.gen_range(1..30));
    let mut gen = Generator {
        rng,
        layout: StoreLayout::default(),
        post,
        users,
        documents: Vec::new(),
    };

    let mut t = start;
    for _ in 0..NUM_COMMENTS {
        t = gen.later_than(t);
        gen.comment(t);
    }

    eprintln!(
        "generated post {post} with {} documents",
        gen.documents.len()
    );
    let dump = StoreDump {
        documents: gen.documents,
    };
    let json = serde_json::to_string_pretty(&dump).context("serializing store dump")?;
    println!("{json}");
    Ok(())
}
