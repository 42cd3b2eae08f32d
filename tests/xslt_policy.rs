// End-to-end behavior of the XSLT policy outside the HTTP stack
#[cfg(test)]
mod test {
    use std::sync::Arc;

    use axon_xslt::{
        RequestContext, TransformParameter, XsltPolicy,
        adapters::BufferedBody,
        config::{OutputConfig, PolicyScope, XsltPolicyConfig},
        core::{InterceptorState, MessageHead, TransformExecutor},
    };
    use bytes::Bytes;
    use http::header::{CONTENT_LENGTH, TRANSFER_ENCODING};

    const NAME_TO_OUT: &str = r#"<xsl:stylesheet version="1.0" xmlns:xsl="http://www.w3.org/1999/XSL/Transform">
  <xsl:template match="/"><out><xsl:value-of select="/root/name"/></out></xsl:template>
</xsl:stylesheet>"#;

    const GREETING: &str = r#"<xsl:stylesheet version="1.0" xmlns:xsl="http://www.w3.org/1999/XSL/Transform">
  <xsl:param name="greeting" select="'Hello'"/>
  <xsl:template match="/"><msg><xsl:value-of select="$greeting"/>, <xsl:value-of select="/root/name"/></msg></xsl:template>
</xsl:stylesheet>"#;

    fn executor() -> TransformExecutor {
        TransformExecutor::from_config(&XsltPolicyConfig {
            stylesheet: NAME_TO_OUT.to_string(),
            ..XsltPolicyConfig::default()
        })
    }

    fn text(bytes: &Bytes) -> String {
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn test_value_of_scenario() {
        let output = executor()
            .apply(NAME_TO_OUT, &[], b"<root><name>A</name></root>")
            .unwrap();
        assert!(text(&output).contains("<out>A</out>"), "unexpected output: {}", text(&output));
    }

    #[test]
    fn test_cache_hit_is_deterministic() {
        let executor = executor();
        let first = executor
            .apply(NAME_TO_OUT, &[], b"<root><name>A</name></root>")
            .unwrap();
        let second = executor
            .apply(NAME_TO_OUT, &[], b"<root><name>A</name></root>")
            .unwrap();

        assert_eq!(first, second);
        let stats = executor.cache_stats();
        assert_eq!(stats.compilations, 1);
        assert_eq!(stats.hits, 1);
    }

    #[test]
    fn test_parameters() {
        let executor = executor();
        let parameters = vec![
            TransformParameter::new("greeting", "Hi"),
            TransformParameter::new("   ", "ignored"),
            TransformParameter::new("undeclared", "ignored"),
        ];

        let output = executor
            .apply(GREETING, &parameters, b"<root><name>Ada</name></root>")
            .unwrap();
        assert!(text(&output).contains("<msg>Hi, Ada</msg>"), "unexpected output: {}", text(&output));

        // Same stylesheet without bindings falls back to the declared default
        let output = executor
            .apply(GREETING, &[], b"<root><name>Ada</name></root>")
            .unwrap();
        assert!(text(&output).contains("<msg>Hello, Ada</msg>"), "unexpected output: {}", text(&output));
        assert_eq!(executor.cache_stats().compilations, 1);
    }

    #[test]
    fn test_request_values_bind_without_recompiling() {
        let config = XsltPolicyConfig::builder()
            .stylesheet(GREETING)
            .parameter("greeting", "{#request.headers['x-greeting']}")
            .output(OutputConfig {
                indent: false,
                ..OutputConfig::default()
            })
            .build()
            .unwrap();
        let policy = XsltPolicy::new(config).unwrap();

        for greeting in ["Hi", "Hola", "Salut", "Ciao"] {
            let mut headers = http::HeaderMap::new();
            headers.insert("x-greeting", http::HeaderValue::from_str(greeting).unwrap());
            let context = RequestContext::new(http::Method::GET, &"/".parse().unwrap(), headers);

            let output = policy
                .transform(&context, b"<root><name>Ada</name></root>")
                .unwrap();
            assert!(
                text(&output).contains(&format!("{greeting}, Ada</msg>")),
                "unexpected output: {}",
                text(&output)
            );
        }

        let stats = policy.executor().cache_stats();
        assert_eq!(stats.compilations, 1);
        assert_eq!(stats.program_builds, 0);
        assert_eq!(stats.hits, 3);
    }

    #[test]
    fn test_malformed_stylesheet_is_retried() {
        let executor = executor();
        let broken = "<xsl:stylesheet version=\"1.0\" xmlns:xsl=\"http://www.w3.org/1999/XSL/Transform\"></xsl:transform>";

        assert!(executor.apply(broken, &[], b"<root/>").is_err());
        assert!(executor.apply(broken, &[], b"<root/>").is_err());
        let stats = executor.cache_stats();
        assert_eq!(stats.entries, 0);
        assert_eq!(stats.misses, 2);
    }

    #[test]
    fn test_concurrent_applications_share_the_cache() {
        let executor = Arc::new(executor());
        std::thread::scope(|scope| {
            for i in 0..4 {
                let executor = executor.clone();
                scope.spawn(move || {
                    for j in 0..5 {
                        let input = format!("<root><name>{i}-{j}</name></root>");
                        let output = executor.apply(NAME_TO_OUT, &[], input.as_bytes()).unwrap();
                        assert!(String::from_utf8_lossy(&output).contains(&format!("<out>{i}-{j}</out>")));
                    }
                });
            }
        });
        assert_eq!(executor.cache_stats().entries, 1);
    }

    #[test]
    fn test_interceptor_fixes_framing_headers() {
        let config = XsltPolicyConfig::builder()
            .scope(PolicyScope::Request)
            .stylesheet(NAME_TO_OUT)
            .output(OutputConfig {
                indent: false,
                ..OutputConfig::default()
            })
            .build()
            .unwrap();
        let policy = Arc::new(XsltPolicy::new(config).unwrap());

        let mut head = MessageHead::default();
        head.headers
            .insert(TRANSFER_ENCODING, "chunked".parse().unwrap());
        let mut interceptor =
            policy.intercept(PolicyScope::Request, RequestContext::default(), BufferedBody::new());
        for chunk in ["<root>", "<name>A</name>", "</root>"] {
            interceptor.write(Bytes::from_static(chunk.as_bytes())).unwrap();
        }
        interceptor.end(&mut head).unwrap();

        assert_eq!(interceptor.state(), InterceptorState::Emitted);
        let output = interceptor.into_sink().to_bytes();
        assert!(head.headers.get(TRANSFER_ENCODING).is_none());
        assert_eq!(
            head.headers.get(CONTENT_LENGTH).unwrap().to_str().unwrap(),
            output.len().to_string()
        );
    }
}
