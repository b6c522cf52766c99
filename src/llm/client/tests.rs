#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use async_trait::async_trait;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::config::{CacheConfig, InferenceConfig};
    use crate::llm::client::{
        ChatMessage, CloudBackend, InferenceBackend, InferenceClient, InferenceError,
        LocalBackend, MockBackend, ModelRequest,
    };

    const CHAT_MODEL: &str = "Qwen/Qwen2.5-Coder-7B-Instruct";
    const UNREACHABLE: &str = "http://127.0.0.1:1";

    fn http() -> reqwest::Client {
        reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap()
    }

    fn cloud(base: &str, backoff: Duration) -> CloudBackend {
        CloudBackend::new(http(), format!("{}/models", base), "test-key", 2, backoff)
    }

    fn local(base: &str) -> LocalBackend {
        LocalBackend::new(http(), base, Duration::from_secs(2))
    }

    fn analyze_request(model_id: &str) -> ModelRequest {
        ModelRequest::new(
            model_id,
            vec![
                ChatMessage::system("You are a code analyzer."),
                ChatMessage::user("Analyze this python code:\n\ndef f(): pass"),
            ],
            0.5,
            500,
        )
    }

    struct FailingBackend;

    #[async_trait]
    impl InferenceBackend for FailingBackend {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn generate(&self, _request: &ModelRequest) -> Result<String, InferenceError> {
            Err(InferenceError::BackendUnavailable { backend: "failing" })
        }
    }

    #[tokio::test]
    async fn test_cloud_retries_after_rate_limit() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path(format!("/models/{}", CHAT_MODEL)))
            .respond_with(ResponseTemplate::new(429))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(format!("/models/{}", CHAT_MODEL)))
            .and(header("authorization", "test-key"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"error": null, "output": {"content": "second try"}})),
            )
            .mount(&server)
            .await;

        let backend = cloud(&server.uri(), Duration::from_secs(5));
        let started = Instant::now();
        let text = backend.generate(&analyze_request(CHAT_MODEL)).await.unwrap();

        assert_eq!(text, "second try");
        assert!(started.elapsed() >= Duration::from_secs(5));
        assert_eq!(server.received_requests().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_cloud_gives_up_after_retries() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let backend = cloud(&server.uri(), Duration::from_millis(10));
        let error = backend
            .generate(&analyze_request(CHAT_MODEL))
            .await
            .unwrap_err();

        assert!(matches!(error, InferenceError::RateLimited { attempts: 3, .. }));
        assert_eq!(server.received_requests().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_cloud_does_not_retry_server_errors() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let backend = cloud(&server.uri(), Duration::from_millis(10));
        let error = backend
            .generate(&analyze_request(CHAT_MODEL))
            .await
            .unwrap_err();

        assert!(matches!(error, InferenceError::Http { status: 500, .. }));
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_cloud_sends_text_prompt_for_non_chat_models() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/models/Salesforce/codet5p-16b"))
            .and(body_partial_json(json!({
                "text": "Instructions: You are a code analyzer.\n\nAnalyze this python code:\n\ndef f(): pass",
                "params": {"max_new_tokens": 500}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"output": "plain"})))
            .mount(&server)
            .await;

        let backend = cloud(&server.uri(), Duration::from_millis(10));
        let text = backend
            .generate(&analyze_request("Salesforce/codet5p-16b"))
            .await
            .unwrap();

        assert_eq!(text, "plain");
    }

    #[tokio::test]
    async fn test_cloud_without_key_is_not_configured() {
        let backend = CloudBackend::new(
            http(),
            UNREACHABLE,
            "  ",
            2,
            Duration::from_millis(10),
        );

        let error = backend
            .generate(&analyze_request(CHAT_MODEL))
            .await
            .unwrap_err();
        assert!(matches!(error, InferenceError::NotConfigured { .. }));
    }

    #[tokio::test]
    async fn test_local_backend_uses_resolved_model() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/tags"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "models": [{"name": "qwen2.5-coder:7b"}, {"name": "llama3.2:3b"}]
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .and(body_partial_json(json!({"model": "qwen2.5-coder:7b", "stream": false})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "message": {"role": "assistant", "content": "local answer"}
            })))
            .mount(&server)
            .await;

        let text = local(&server.uri())
            .generate(&analyze_request(CHAT_MODEL))
            .await
            .unwrap();
        assert_eq!(text, "local answer");
    }

    #[tokio::test]
    async fn test_local_backend_reports_missing_model() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/tags"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"models": [{"name": "mistral:7b"}]})),
            )
            .mount(&server)
            .await;

        let error = local(&server.uri())
            .generate(&analyze_request(CHAT_MODEL))
            .await
            .unwrap_err();

        assert!(matches!(error, InferenceError::ModelUnavailable { .. }));
        // 模型未安装时不应发起对话请求
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_local_backend_unreachable() {
        let error = local(UNREACHABLE)
            .generate(&analyze_request(CHAT_MODEL))
            .await
            .unwrap_err();
        assert!(matches!(error, InferenceError::BackendUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_client_falls_through_cloud_failure_to_local() {
        let cloud_server = MockServer::start().await;
        let local_server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&cloud_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/tags"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"models": [{"name": "qwen2.5-coder:7b"}]})),
            )
            .mount(&local_server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"message": {"content": "from local"}})),
            )
            .mount(&local_server)
            .await;

        let client = InferenceClient::with_backends(vec![
            Arc::new(cloud(&cloud_server.uri(), Duration::from_millis(10))),
            Arc::new(local(&local_server.uri())),
        ]);

        let generation = client.generate_request(&analyze_request(CHAT_MODEL)).await;
        assert_eq!(generation.text, "from local");
        assert_eq!(generation.backend, LocalBackend::NAME);
    }

    #[tokio::test]
    async fn test_client_falls_back_to_mock_when_everything_fails() {
        let client = InferenceClient::with_backends(vec![
            Arc::new(FailingBackend),
            Arc::new(local(UNREACHABLE)),
        ]);

        let generation = client.generate_request(&analyze_request(CHAT_MODEL)).await;
        assert_eq!(generation.backend, MockBackend::NAME);
        assert!(!generation.text.is_empty());
        assert!(generation.text.contains("documentation_needs"));

        let text = client
            .generate(CHAT_MODEL, vec![ChatMessage::user("")], 0.5, 10)
            .await;
        assert!(!text.is_empty());
    }

    #[tokio::test]
    async fn test_client_skips_cloud_without_key() {
        let cloud_server = MockServer::start().await;

        let config = InferenceConfig {
            cloud_api_base_url: cloud_server.uri(),
            cloud_api_key: String::new(),
            local_api_base_url: UNREACHABLE.to_string(),
            local_probe_timeout_seconds: 1,
            ..InferenceConfig::default()
        };
        let client = InferenceClient::new(&config, &CacheConfig::default()).unwrap();

        assert_eq!(client.backend_names(), vec![LocalBackend::NAME]);
        let text = client
            .generate(CHAT_MODEL, vec![ChatMessage::user("Verify this documentation")], 0.5, 10)
            .await;

        assert!(text.contains("quality_score"));
        assert!(cloud_server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_client_caches_remote_answers_but_not_mock() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let local_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/tags"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"models": [{"name": "qwen2.5-coder:7b"}]})),
            )
            .mount(&local_server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"message": {"content": "cached"}})),
            )
            .expect(1)
            .mount(&local_server)
            .await;

        let cache = crate::cache::CacheManager::new(CacheConfig {
            enabled: true,
            cache_dir: temp_dir.path().to_path_buf(),
            expire_hours: 1,
        });
        let client = InferenceClient::with_backends(vec![Arc::new(local(&local_server.uri()))])
            .with_cache(cache);

        let request = analyze_request(CHAT_MODEL);
        let first = client.generate_request(&request).await;
        let second = client.generate_request(&request).await;
        assert_eq!(first.text, "cached");
        assert_eq!(second.text, "cached");
        assert_eq!(second.backend, LocalBackend::NAME);

        let mock_client = InferenceClient::mock_only().with_cache(crate::cache::CacheManager::new(
            CacheConfig {
                enabled: true,
                cache_dir: temp_dir.path().join("mock"),
                expire_hours: 1,
            },
        ));
        mock_client.generate_request(&request).await;
        assert!(!temp_dir.path().join("mock").exists());
    }
}
