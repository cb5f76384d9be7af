//! In-process fakes shared by unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Semaphore;

use crate::domain::{Credential, Item, MutationOp};
use crate::remote::{ApiError, ApiResult, AuthApi, Cursor, ItemPage, RemoteApi};
use crate::store::{Notice, Observer};

pub fn remote_item(id: &str) -> Item {
    let mut item = Item::new(id, format!("https://example.com/{}", id));
    item.title = format!("Article {}", id);
    item.added_at = chrono::DateTime::from_timestamp(1_700_000_000, 0).unwrap();
    item
}

struct Script {
    items: Vec<Item>,
    page_size: usize,
    page_failures: HashMap<usize, ApiError>,
    results: VecDeque<ApiResult<()>>,
    mutations: Vec<(String, MutationOp)>,
    adds: usize,
    fetches: usize,
}

/// Scripted remote listing. Mutations succeed unless results are queued with
/// [`FakeRemote::script_mutations`]; adds consume the same queue.
pub struct FakeRemote {
    script: Mutex<Script>,
    gate: Mutex<Option<Arc<Semaphore>>>,
}

impl FakeRemote {
    pub fn with_items(ids: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(Script {
                items: ids.iter().map(|id| remote_item(id)).collect(),
                page_size: 100,
                page_failures: HashMap::new(),
                results: VecDeque::new(),
                mutations: Vec::new(),
                adds: 0,
                fetches: 0,
            }),
            gate: Mutex::new(None),
        })
    }

    pub fn set_items(&self, ids: &[&str]) {
        self.script.lock().unwrap().items = ids.iter().map(|id| remote_item(id)).collect();
    }

    pub fn set_page_size(&self, size: usize) {
        self.script.lock().unwrap().page_size = size;
    }

    pub fn remove_item(&self, id: &str) {
        self.script.lock().unwrap().items.retain(|i| i.id != id);
    }

    pub fn replace_item(&self, item: Item) {
        let mut script = self.script.lock().unwrap();
        if let Some(existing) = script.items.iter_mut().find(|i| i.id == item.id) {
            *existing = item;
        }
    }

    /// Fail the `index`th page (zero-based) of the next listing once.
    pub fn fail_page(&self, index: usize, err: ApiError) {
        self.script.lock().unwrap().page_failures.insert(index, err);
    }

    pub fn script_mutations(&self, results: Vec<ApiResult<()>>) {
        self.script.lock().unwrap().results.extend(results);
    }

    /// Block mutations and adds until [`FakeRemote::release_mutations`].
    pub fn hold_mutations(&self) {
        *self.gate.lock().unwrap() = Some(Arc::new(Semaphore::new(0)));
    }

    pub fn release_mutations(&self) {
        if let Some(gate) = self.gate.lock().unwrap().take() {
            gate.close();
        }
    }

    pub fn mutations(&self) -> Vec<(String, MutationOp)> {
        self.script.lock().unwrap().mutations.clone()
    }

    pub fn fetch_count(&self) -> usize {
        self.script.lock().unwrap().fetches
    }

    async fn wait_for_gate(&self) {
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            let _ = gate.acquire().await;
        }
    }
}

#[async_trait]
impl RemoteApi for FakeRemote {
    async fn fetch_items(
        &self,
        _credential: &Credential,
        cursor: Option<Cursor>,
    ) -> ApiResult<ItemPage> {
        let mut script = self.script.lock().unwrap();
        script.fetches += 1;

        let offset = cursor.unwrap_or(0) as usize;
        let size = script.page_size.max(1);
        if let Some(err) = script.page_failures.remove(&(offset / size)) {
            return Err(err);
        }

        let end = (offset + size).min(script.items.len());
        let items = script.items.get(offset..end).unwrap_or_default().to_vec();
        let next_cursor = (end < script.items.len()).then_some(end as Cursor);
        Ok(ItemPage { items, next_cursor })
    }

    async fn mutate(
        &self,
        _credential: &Credential,
        item_id: &str,
        op: MutationOp,
    ) -> ApiResult<()> {
        self.wait_for_gate().await;
        let mut script = self.script.lock().unwrap();
        script.mutations.push((item_id.to_string(), op));
        script.results.pop_front().unwrap_or(Ok(()))
    }

    async fn add(&self, _credential: &Credential, url: &str) -> ApiResult<Item> {
        self.wait_for_gate().await;
        let mut script = self.script.lock().unwrap();
        script.results.pop_front().unwrap_or(Ok(()))?;
        script.adds += 1;
        let mut item = remote_item(&format!("added-{}", script.adds));
        item.url = url.to_string();
        Ok(item)
    }
}

/// Auth endpoints that always grant access to `alice`.
pub struct FakeAuth;

#[async_trait]
impl AuthApi for FakeAuth {
    async fn request_token(&self, _redirect_uri: &str) -> ApiResult<String> {
        Ok("code-1".into())
    }

    async fn access_token(&self, code: &str) -> ApiResult<Credential> {
        Ok(Credential::new(format!("token-for-{}", code), "alice"))
    }
}

/// Observer that keeps everything it is told.
#[derive(Default)]
pub struct RecordingObserver {
    changes: Mutex<Vec<Arc<[Item]>>>,
    notices: Mutex<Vec<Notice>>,
}

impl RecordingObserver {
    pub fn changes(&self) -> Vec<Arc<[Item]>> {
        self.changes.lock().unwrap().clone()
    }

    pub fn change_count(&self) -> usize {
        self.changes.lock().unwrap().len()
    }

    pub fn notices(&self) -> Vec<Notice> {
        self.notices.lock().unwrap().clone()
    }
}

impl Observer for RecordingObserver {
    fn on_change(&self, items: Arc<[Item]>) {
        self.changes.lock().unwrap().push(items);
    }

    fn on_notice(&self, notice: &Notice) {
        self.notices.lock().unwrap().push(notice.clone());
    }
}
