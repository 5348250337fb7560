//! Integration tests for the policy engine.

use std::collections::BTreeSet;
use std::sync::Arc;

use pretty_assertions::assert_eq;

use rowguard_core::{
    AccessRule, EngineConfig, FieldDef, FieldGrant, FieldKind, GroupId, ModelDef,
    Operation, PolicyBundle, PolicyEngine, PolicyError, Principal, RecordRuleDef, Row,
};
use rowguard_domain::{
    parse, DomainEvaluator, DomainExpr, MemoryRecord, MemoryRecords, Operator, RecordId,
    RecordView, Value,
};

fn models() -> Vec<ModelDef> {
    vec![
        ModelDef::new("partner")
            .with_field(FieldDef::new("name", FieldKind::Char))
            .with_field(FieldDef::new("phone", FieldKind::Char)),
        ModelDef::new("doc")
            .with_field(FieldDef::new("name", FieldKind::Char))
            .with_field(FieldDef::new("owner", FieldKind::Integer))
            .with_field(FieldDef::new("price", FieldKind::Float))
            .with_field(FieldDef::new("salary", FieldKind::Float))
            .with_field(FieldDef::many2one("contact", "partner")),
    ]
}

fn bundle_with(models: Vec<ModelDef>) -> PolicyBundle {
    models
        .into_iter()
        .fold(PolicyBundle::new(), PolicyBundle::with_model)
}

fn records() -> MemoryRecords {
    MemoryRecords::new()
        .with(MemoryRecord::new(100).with_field("name", "Ada").with_field("phone", ""))
        .with(MemoryRecord::new(101).with_field("name", "Bob").with_field("phone", "555"))
        .with(
            MemoryRecord::new(1)
                .with_field("name", "a")
                .with_field("owner", 42)
                .with_field("price", 5.0)
                .with_field("salary", 1000.0)
                .with_field("contact", RecordId(100)),
        )
        .with(
            MemoryRecord::new(2)
                .with_field("name", "b")
                .with_field("owner", 7)
                .with_field("price", 9.5)
                .with_field("salary", 2000.0)
                .with_field("contact", RecordId(101)),
        )
}

fn ids(raw: &[i64]) -> Vec<RecordId> {
    raw.iter().copied().map(RecordId).collect()
}

#[test]
fn scenario_a_group_write_grant() {
    let bundle = bundle_with(models()).with_access_rule(
        AccessRule::new("doc_editors", "doc")
            .for_group("editors")
            .allow(Operation::Write),
    );
    let engine = PolicyEngine::with_bundle(&bundle).unwrap();

    let editor = Principal::new("e").with_group("editors");
    let viewer = Principal::new("v").with_group("viewers");

    assert!(engine.check_operation(&editor, "doc", Operation::Write).is_allowed());
    assert!(matches!(
        engine.check_operation(&viewer, "doc", Operation::Write).into_result(),
        Err(PolicyError::NoAccess { .. })
    ));
}

#[test]
fn scenario_b_global_read_rule() {
    let bundle = bundle_with(models())
        .with_access_rule(AccessRule::new("doc_read", "doc").allow(Operation::Read))
        .with_record_rule(RecordRuleDef::new("own", "doc", "[('owner', '=', 42)]").on(Operation::Read));
    let engine = PolicyEngine::with_bundle(&bundle).unwrap();

    let allowed = engine
        .filter_records(&Principal::new("u"), "doc", Operation::Read, &ids(&[1, 2]), &records())
        .unwrap();
    assert_eq!(allowed, ids(&[1]));
}

#[test]
fn scenario_c_relational_hop_with_empty_phone() {
    let domain = DomainExpr::and(vec![
        DomainExpr::leaf("price", Operator::Gt, 0),
        DomainExpr::leaf("contact.phone", Operator::Ne, ""),
    ]);
    let records = records();
    assert!(!DomainEvaluator::evaluate(&domain, &RecordView::new(RecordId(1), &records)).unwrap());
    assert!(DomainEvaluator::evaluate(&domain, &RecordView::new(RecordId(2), &records)).unwrap());

    // The same domain loaded as a record rule.
    let bundle = bundle_with(models())
        .with_access_rule(AccessRule::new("doc_read", "doc").allow(Operation::Read))
        .with_record_rule(RecordRuleDef::new("reachable", "doc", domain.to_string()));
    let engine = PolicyEngine::with_bundle(&bundle).unwrap();
    let allowed = engine
        .filter_records(&Principal::new("u"), "doc", Operation::Read, &ids(&[1, 2]), &records)
        .unwrap();
    assert_eq!(allowed, ids(&[2]));
}

#[test]
fn scenario_d_salary_masked_without_hr() {
    let bundle = bundle_with(models())
        .with_access_rule(AccessRule::new("doc_read", "doc").allow(Operation::Read))
        .with_field_grant(FieldGrant::new("doc", "salary").read_by("hr"));
    let engine = PolicyEngine::with_bundle(&bundle).unwrap();

    let record: Row = [
        ("name".to_string(), Value::from("a")),
        ("salary".to_string(), Value::Float(1000.0)),
    ]
    .into_iter()
    .collect();

    let clerk = Principal::new("c").with_group("sales");
    let projected = engine.project_fields(&clerk, "doc", &record, ["name", "salary"]);
    assert_eq!(projected.keys().collect::<Vec<_>>(), vec!["name"]);

    let hr = Principal::new("h").with_group("hr");
    let projected = engine.project_fields(&hr, "doc", &record, ["name", "salary"]);
    assert_eq!(projected.len(), 2);
}

#[test]
fn default_deny_without_access_rules() {
    let engine = PolicyEngine::with_bundle(&bundle_with(models())).unwrap();
    let principals = [
        Principal::new("nobody"),
        Principal::new("admin").with_groups(["admins", "editors", "hr"]),
    ];
    for principal in &principals {
        for op in Operation::ALL {
            assert!(!engine.check_operation(principal, "doc", op).is_allowed());
        }
    }
}

fn layered_bundle() -> PolicyBundle {
    bundle_with(models())
        .with_access_rule(AccessRule::new("a_read", "doc").for_group("a").allow(Operation::Read))
        .with_access_rule(AccessRule::new("b_write", "doc").for_group("b").allow(Operation::Write))
        .with_access_rule(
            AccessRule::new("b_create", "doc")
                .for_group("b")
                .allow(Operation::Create)
                .allow(Operation::Read),
        )
        .with_access_rule(AccessRule::new("all_unlink", "partner").allow(Operation::Unlink))
}

#[test]
fn access_rights_are_additive() {
    let bundle = layered_bundle();
    let engine = PolicyEngine::with_bundle(&bundle).unwrap();
    let principal = Principal::new("p").with_groups(["a", "b"]);

    for model in ["doc", "partner"] {
        for op in Operation::ALL {
            let expected = bundle.access_rules.iter().any(|r| {
                r.model == model
                    && r.allows(op)
                    && r.group.as_ref().map_or(true, |g| principal.in_group(g))
            });
            assert_eq!(
                engine.check_operation(&principal, model, op).is_allowed(),
                expected,
                "{model} {op}"
            );
        }
    }
}

#[test]
fn access_rights_are_monotone_in_groups() {
    let engine = PolicyEngine::with_bundle(&layered_bundle()).unwrap();
    let universe = ["a", "b", "c"];

    // Every subset, as a bitmask.
    for small in 0u8..8 {
        for large in 0u8..8 {
            if small & large != small {
                continue;
            }
            let groups = |mask: u8| -> BTreeSet<GroupId> {
                universe
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| mask & (1 << i) != 0)
                    .map(|(_, g)| GroupId::from(*g))
                    .collect()
            };
            let p_small = Principal { id: "p".into(), groups: groups(small) };
            let p_large = Principal { id: "p".into(), groups: groups(large) };
            for op in Operation::ALL {
                let before = engine.check_operation(&p_small, "doc", op).is_allowed();
                let after = engine.check_operation(&p_large, "doc", op).is_allowed();
                assert!(!before || after, "adding groups revoked {op}");
            }
        }
    }
}

#[test]
fn global_and_group_rules_combine() {
    let bundle = bundle_with(models())
        .with_access_rule(AccessRule::new("doc_write", "doc").allow(Operation::Write))
        .with_record_rule(RecordRuleDef::new("floor", "doc", "[('price', '>', 0)]").on(Operation::Write))
        .with_record_rule(
            RecordRuleDef::new("mine", "doc", "[('owner', '=', 42)]")
                .for_group("sales")
                .on(Operation::Write),
        );
    let engine = PolicyEngine::with_bundle(&bundle).unwrap();
    let records = records();

    // In the group: floor AND group rule.
    let seller = Principal::new("s").with_group("sales");
    let allowed = engine
        .filter_records(&seller, "doc", Operation::Write, &ids(&[1, 2]), &records)
        .unwrap();
    assert_eq!(allowed, ids(&[1]));

    // No group rule applies: only the floor.
    let other = Principal::new("o");
    let allowed = engine
        .filter_records(&other, "doc", Operation::Write, &ids(&[1, 2]), &records)
        .unwrap();
    assert_eq!(allowed, ids(&[1, 2]));
}

#[test]
fn domains_round_trip_through_text() {
    let sources = [
        "[('owner', '=', 42)]",
        "['|', ('owner', '=', 42), ('price', '>', 1.5)]",
        "['!', '&', ('name', 'ilike', 'draft'), ('owner', 'not in', [1, 2, 3])]",
        "[('contact.phone', '!=', ''), ('contact', 'child_of', [100]), (0, '=', 1)]",
        "['|', '&', ('a', '=', True), ('b', '=', None), '|', ('c', 'like', 'x'), ('d', '<=', -4)]",
    ];
    for source in sources {
        let ast = parse(source).unwrap();
        let reparsed = parse(&ast.to_string()).unwrap();
        assert_eq!(ast, reparsed, "{source}");
    }
}

#[test]
fn field_masking_never_leaks_restricted_fields() {
    let bundle = bundle_with(models())
        .with_field_grant(FieldGrant::new("doc", "salary").read_by("hr"))
        .with_field_grant(FieldGrant::new("doc", "price").read_by("sales").read_by("hr"))
        .with_field_grant(FieldGrant::new("doc", "name"));
    let engine = PolicyEngine::with_bundle(&bundle).unwrap();
    let snapshot = engine.snapshot();
    let all = ["name", "owner", "price", "salary", "contact"];

    for groups in [vec![], vec!["sales"], vec!["hr"], vec!["sales", "other"]] {
        let principal = Principal::new("p").with_groups(groups);
        let visible = snapshot.field_grants().visible_fields(&principal, "doc", all);
        for field in all {
            let grant = snapshot.field_grants().get("doc", field);
            match grant {
                Some(g) if !g.read_groups.is_empty() && !principal.in_any(&g.read_groups) => {
                    assert!(!visible.contains(field))
                }
                _ => assert!(visible.contains(field)),
            }
        }
    }
}

#[test]
fn load_is_all_or_nothing() {
    let engine = PolicyEngine::with_bundle(
        &bundle_with(models()).with_access_rule(AccessRule::new("r", "doc").allow(Operation::Read)),
    )
    .unwrap();

    let rejected = [
        bundle_with(models()).with_access_rule(AccessRule::new("empty", "doc")),
        bundle_with(models())
            .with_record_rule(RecordRuleDef::new("arity", "doc", "['&', ('owner', '=', 1)]")),
        bundle_with(models())
            .with_record_rule(RecordRuleDef::new("type", "doc", "[('price', '>', 'abc')]")),
        bundle_with(models())
            .with_record_rule(RecordRuleDef::new("hop", "doc", "[('contact.email', '=', 'x')]")),
        bundle_with(models()).with_field_grant(FieldGrant::new("invoice", "total")),
    ];
    for bundle in &rejected {
        assert!(engine.reload(bundle).is_err());
        assert_eq!(engine.generation(), 1);
        assert_eq!(engine.snapshot().access().len(), 1);
    }
}

#[test]
fn evaluation_errors_surface_and_fail_closed_at_guards() {
    let bundle = bundle_with(models())
        .with_access_rule(AccessRule::new("doc_all", "doc").allow_all())
        .with_record_rule(RecordRuleDef::new("hop", "doc", "[('contact.phone', '!=', '')]"));
    let engine = PolicyEngine::with_bundle(&bundle).unwrap();

    // Record 3 points at a partner that does not exist.
    let records = records().with(
        MemoryRecord::new(3)
            .with_field("owner", 1)
            .with_field("contact", RecordId(999)),
    );
    let principal = Principal::new("u");

    let err = engine
        .filter_records(&principal, "doc", Operation::Read, &ids(&[3]), &records)
        .unwrap_err();
    assert!(matches!(err, PolicyError::Provider(_)));

    let err = engine
        .guard_unlink(&principal, "doc", RecordId(3), &records)
        .unwrap_err();
    assert!(!err.is_denial());
}

#[test]
fn archive_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let config = EngineConfig::default().with_archive_path(dir.path().join("policy"));

    {
        let engine = PolicyEngine::new(config.clone()).unwrap();
        assert_eq!(engine.generation(), 0);
        engine
            .reload(&bundle_with(models()).with_access_rule(AccessRule::new("r", "doc").allow(Operation::Read)))
            .unwrap();
        let generation = engine
            .reload(&layered_bundle())
            .unwrap();
        assert_eq!(generation, 2);
        engine.archive().unwrap().flush().unwrap();
    }

    let engine = PolicyEngine::new(config).unwrap();
    assert_eq!(engine.generation(), 2);
    let p = Principal::new("p").with_group("b");
    assert!(engine.check_operation(&p, "doc", Operation::Create).is_allowed());

    let archive = engine.archive().unwrap();
    assert_eq!(archive.list_generations().unwrap(), vec![1, 2]);
    assert_eq!(archive.prune(1).unwrap(), 1);
    assert_eq!(engine.reload(&bundle_with(models())).unwrap(), 3);
}

#[test]
fn readers_see_whole_snapshots_during_reload() {
    let one = bundle_with(models())
        .with_access_rule(AccessRule::new("r", "doc").allow(Operation::Read))
        .with_access_rule(AccessRule::new("w", "doc").allow(Operation::Write));
    let two = bundle_with(models());
    let engine = Arc::new(PolicyEngine::with_bundle(&one).unwrap());

    std::thread::scope(|scope| {
        for _ in 0..4 {
            let engine = Arc::clone(&engine);
            scope.spawn(move || {
                for _ in 0..500 {
                    let snapshot = engine.snapshot();
                    let count = snapshot.access().len();
                    // Either generation is complete; never a mix.
                    assert!(count == 0 || count == 2);
                    assert_eq!(count == 2, snapshot.generation() % 2 == 1);
                }
            });
        }
        for i in 0..50 {
            let bundle = if i % 2 == 0 { &two } else { &one };
            engine.reload(bundle).unwrap();
        }
    });
}
