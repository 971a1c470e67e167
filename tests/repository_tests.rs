use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Mutex;

use modelgraph::{
    ActionSender, CollectionDescriptor, Id, Model, ModelGraph, Repository, Result, StoreError,
};

fn widget(id: u32, name: &str, weight: f64) -> Model {
    Model::new("demo/widget", json!({ "id": id, "name": name, "weight": weight })).unwrap()
}

async fn commit_models(graph: &ModelGraph, change_id: u64, models: Vec<Model>) {
    let slot = graph.get_new_slot().await;
    graph.data_store().add(models, None).await.unwrap();
    graph.commit(slot, change_id, false).unwrap();
}

#[tokio::test]
async fn test_list_observable_emits_the_sorted_list_on_commit() {
    let graph = ModelGraph::in_memory();
    let repo = graph.register(CollectionDescriptor::new("demo/widget"));
    graph.initialize().await.unwrap();

    let mut list_rx = repo.get_view_model_list_observable();
    assert!(list_rx.borrow_and_update().is_empty());

    commit_models(
        &graph,
        1,
        vec![widget(2, "b", 1.0), widget(1, "a", 2.0)],
    )
    .await;

    let list = Repository::next_list_update(&mut list_rx).await.unwrap();
    let ids: Vec<u32> = list.iter().map(|vm| vm.id()).collect();
    assert_eq!(ids, vec![1, 2]);
}

#[tokio::test]
async fn test_burst_of_commits_collapses_to_the_latest_list() {
    let graph = ModelGraph::in_memory();
    let repo = graph.register(CollectionDescriptor::new("demo/widget"));
    graph.initialize().await.unwrap();

    let mut list_rx = repo.get_view_model_list_observable();
    commit_models(&graph, 1, vec![widget(1, "a", 1.0)]).await;
    commit_models(&graph, 2, vec![widget(2, "b", 1.0)]).await;
    commit_models(&graph, 3, vec![widget(3, "c", 1.0)]).await;

    // Three commits within the audit window, one observed list.
    let list = Repository::next_list_update(&mut list_rx).await.unwrap();
    assert_eq!(list.len(), 3);
    assert!(!list_rx.has_changed().unwrap());
}

#[tokio::test]
async fn test_per_id_observable_emits_none_on_deletion() {
    let graph = ModelGraph::in_memory();
    let repo = graph.register(CollectionDescriptor::new("demo/widget"));
    graph.initialize().await.unwrap();

    let mut rx = repo.get_view_model_observable(1);
    assert!(rx.borrow_and_update().is_none());

    commit_models(&graph, 1, vec![widget(1, "a", 1.0)]).await;
    rx.changed().await.unwrap();
    assert_eq!(rx.borrow_and_update().as_ref().unwrap().title(), "a");

    let slot = graph.get_new_slot().await;
    graph
        .data_store()
        .remove("demo/widget", &[1], None)
        .await
        .unwrap();
    graph.commit(slot, 2, false).unwrap();

    rx.changed().await.unwrap();
    assert!(rx.borrow_and_update().is_none());
}

#[tokio::test]
async fn test_sort_function_controls_the_sorted_list() {
    let graph = ModelGraph::in_memory();
    let repo = graph.register(CollectionDescriptor::new("demo/widget"));
    graph.initialize().await.unwrap();

    commit_models(
        &graph,
        1,
        vec![widget(1, "c", 1.0), widget(2, "a", 2.0), widget(3, "b", 3.0)],
    )
    .await;

    repo.set_sort_function(|a, b| a.title().cmp(&b.title()));
    let ids: Vec<u32> = repo
        .get_sorted_view_model_list()
        .iter()
        .map(|vm| vm.id())
        .collect();
    assert_eq!(ids, vec![2, 3, 1]);

    // The unsorted accessor stays in id order.
    let ids: Vec<u32> = repo.get_view_model_list().iter().map(|vm| vm.id()).collect();
    assert_eq!(ids, vec![1, 2, 3]);
}

#[tokio::test]
async fn test_descriptor_default_sort_seeds_the_repository() {
    let graph = ModelGraph::in_memory();
    let repo = graph.register(
        CollectionDescriptor::new("demo/widget").with_sort(|a, b| b.id().cmp(&a.id())),
    );
    graph.initialize().await.unwrap();

    commit_models(
        &graph,
        1,
        vec![widget(1, "a", 1.0), widget(2, "b", 2.0), widget(3, "c", 3.0)],
    )
    .await;

    let ids: Vec<u32> = repo
        .get_sorted_view_model_list()
        .iter()
        .map(|vm| vm.id())
        .collect();
    assert_eq!(ids, vec![3, 2, 1]);
}

#[tokio::test]
async fn test_owner_index_resolves_content_objects() {
    let graph = ModelGraph::in_memory();
    let repo = graph.register_repository(Arc::new(
        graph
            .build_repository(CollectionDescriptor::new("demo/item"))
            .with_owner_index("content_object"),
    ));
    graph.register(CollectionDescriptor::new("demo/topic"));
    graph.initialize().await.unwrap();

    commit_models(
        &graph,
        1,
        vec![
            Model::new(
                "demo/item",
                json!({ "id": 1, "content_object": { "collection": "demo/topic", "id": 5 } }),
            )
            .unwrap(),
            Model::new("demo/topic", json!({ "id": 5 })).unwrap(),
        ],
    )
    .await;

    let item = repo.get_by_content_object("demo/topic", 5).unwrap();
    assert_eq!(item.id(), 1);
    assert!(repo.get_by_content_object("demo/topic", 6).is_none());

    let slot = graph.get_new_slot().await;
    graph
        .data_store()
        .remove("demo/item", &[1], None)
        .await
        .unwrap();
    graph.commit(slot, 2, false).unwrap();
    assert!(repo.get_by_content_object("demo/topic", 5).is_none());
}

#[tokio::test]
async fn test_owner_index_forgets_the_previous_owner_on_move() {
    let graph = ModelGraph::in_memory();
    let repo = graph.register_repository(Arc::new(
        graph
            .build_repository(CollectionDescriptor::new("demo/item"))
            .with_owner_index("content_object"),
    ));
    graph.register(CollectionDescriptor::new("demo/topic"));
    graph.initialize().await.unwrap();

    commit_models(
        &graph,
        1,
        vec![
            Model::new(
                "demo/item",
                json!({ "id": 1, "content_object": { "collection": "demo/topic", "id": 5 } }),
            )
            .unwrap(),
            Model::new("demo/topic", json!({ "id": 5 })).unwrap(),
            Model::new("demo/topic", json!({ "id": 6 })).unwrap(),
        ],
    )
    .await;
    assert_eq!(repo.get_by_content_object("demo/topic", 5).unwrap().id(), 1);

    // The item moves to another owner; the old index entry must not keep
    // answering for it.
    commit_models(
        &graph,
        2,
        vec![Model::new(
            "demo/item",
            json!({ "id": 1, "content_object": { "collection": "demo/topic", "id": 6 } }),
        )
        .unwrap()],
    )
    .await;

    assert!(repo.get_by_content_object("demo/topic", 5).is_none());
    assert_eq!(repo.get_by_content_object("demo/topic", 6).unwrap().id(), 1);
}

#[tokio::test]
async fn test_element_id_validation_covers_registered_collections() {
    let graph = ModelGraph::in_memory();
    graph.register(CollectionDescriptor::new("demo/widget"));
    graph.initialize().await.unwrap();

    let registry = graph.registry();
    assert!(registry.is_valid_element_id("demo/widget:3"));
    assert!(!registry.is_valid_element_id("demo/widget:0"));
    assert!(!registry.is_valid_element_id("demo/widget:+3"));
    assert!(!registry.is_valid_element_id("demo/unknown:3"));
    assert!(!registry.is_valid_element_id("demo/widget"));
}

#[derive(Default)]
struct RecordingSender {
    calls: Mutex<Vec<(String, Option<Id>, Option<Value>)>>,
}

#[async_trait]
impl ActionSender for RecordingSender {
    async fn create(&self, collection: &str, payload: Value) -> Result<Value> {
        self.calls
            .lock()
            .await
            .push((format!("create {}", collection), None, Some(payload)));
        Ok(json!({ "id": 42 }))
    }

    async fn update(&self, collection: &str, id: Id, payload: Value) -> Result<()> {
        self.calls
            .lock()
            .await
            .push((format!("update {}", collection), Some(id), Some(payload)));
        Ok(())
    }

    async fn patch(&self, collection: &str, id: Id, payload: Value) -> Result<()> {
        self.calls
            .lock()
            .await
            .push((format!("patch {}", collection), Some(id), Some(payload)));
        Ok(())
    }

    async fn delete(&self, collection: &str, id: Id) -> Result<()> {
        self.calls
            .lock()
            .await
            .push((format!("delete {}", collection), Some(id), None));
        Ok(())
    }
}

#[tokio::test]
async fn test_writes_go_through_the_action_sender() {
    let sender = Arc::new(RecordingSender::default());
    let graph = ModelGraph::in_memory();
    let repo = graph.register_repository(Arc::new(
        graph
            .build_repository(CollectionDescriptor::new("demo/widget"))
            .with_action_sender(sender.clone()),
    ));
    graph.initialize().await.unwrap();

    commit_models(&graph, 1, vec![widget(1, "old", 1.0)]).await;
    let vm = repo.get_view_model(1).unwrap();

    repo.create(json!({ "name": "new" })).await.unwrap();
    repo.update(json!({ "name": "renamed" }), &vm).await.unwrap();
    repo.patch(json!({ "weight": 9 }), &vm).await.unwrap();
    repo.delete(&vm).await.unwrap();

    let calls = sender.calls.lock().await;
    assert_eq!(calls.len(), 4);
    // A full update sends the merged model, a patch only the given fields.
    assert_eq!(
        calls[1].2,
        Some(json!({ "id": 1, "name": "renamed", "weight": 1.0 }))
    );
    assert_eq!(calls[2].2, Some(json!({ "weight": 9 })));
    assert_eq!(calls[3].1, Some(1));
}

#[tokio::test]
async fn test_writes_without_a_sender_are_rejected() {
    let graph = ModelGraph::in_memory();
    let repo = graph.register(CollectionDescriptor::new("demo/widget"));
    graph.initialize().await.unwrap();

    commit_models(&graph, 1, vec![widget(1, "a", 1.0)]).await;
    let vm = repo.get_view_model(1).unwrap();

    assert!(matches!(
        repo.delete(&vm).await,
        Err(StoreError::Unsupported(_))
    ));
}

#[tokio::test]
async fn test_general_observable_fires_per_changed_model() {
    let graph = ModelGraph::in_memory();
    let repo = graph.register(CollectionDescriptor::new("demo/widget"));
    graph.initialize().await.unwrap();

    let mut general = repo.get_general_view_model_observable();
    commit_models(&graph, 1, vec![widget(1, "a", 1.0), widget(2, "b", 2.0)]).await;

    let mut seen = vec![
        general.try_recv().unwrap().id(),
        general.try_recv().unwrap().id(),
    ];
    seen.sort_unstable();
    assert_eq!(seen, vec![1, 2]);
    assert!(general.try_recv().is_err());
}
