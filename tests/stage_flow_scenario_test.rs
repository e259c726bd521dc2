// ==========================================
// 工序流转场景测试
// ==========================================
// 职责: 染色 → 毡处理的端到端场景, 迁移规则与审计完整性
// ==========================================

#[path = "test_helpers.rs"]
mod test_helpers;

#[cfg(test)]
mod stage_flow_scenario_test {
    use textile_flow::domain::stage::CompletionReport;
    use textile_flow::domain::types::{ProcessType, StageStatus};
    use textile_flow::engine::{EngineError, StageWorkflowCatalog, TransitionRequest};

    use crate::test_helpers::{setup_engine, ACTOR};

    // ==========================================
    // 测试1: 染色完工 → 两次领用
    // ==========================================

    #[test]
    fn test_dyeing_output_feeds_felt_allocations() {
        let (_temp_file, engine) = setup_engine();

        let dyeing = engine.produced_stage("LOT-A", ProcessType::Dyeing, 1, 50.0, 45.0, 5.0);
        assert_eq!(dyeing.status, StageStatus::Completed);
        assert_eq!(dyeing.produced_quantity, Some(45.0));
        assert_eq!(dyeing.defect_quantity, Some(5.0));

        let available = engine
            .ledger
            .available_balance("LOT-A", &dyeing.stage_instance_id)
            .unwrap();
        assert!((available - 45.0).abs() < 1e-9);

        let felt_1 = engine.register("LOT-A", ProcessType::Felt, 2, 0.0);
        let felt_2 = engine.register("LOT-A", ProcessType::Felt, 2, 0.0);

        engine
            .ledger
            .allocate("LOT-A", &dyeing.stage_instance_id, &felt_1.stage_instance_id, 30.0)
            .unwrap();
        let available = engine
            .ledger
            .available_balance("LOT-A", &dyeing.stage_instance_id)
            .unwrap();
        assert!((available - 15.0).abs() < 1e-9);

        let err = engine
            .ledger
            .allocate("LOT-A", &dyeing.stage_instance_id, &felt_2.stage_instance_id, 20.0)
            .unwrap_err();
        match err {
            EngineError::InsufficientBalance { requested, available, .. } => {
                assert_eq!(requested, 20.0);
                assert!((available - 15.0).abs() < 1e-9);
            }
            other => panic!("Expected InsufficientBalance, got {other:?}"),
        }

        // 领用方投入量随领用增长
        assert_eq!(engine.reload(&felt_1.stage_instance_id).input_quantity, 30.0);
        assert_eq!(engine.reload(&felt_2.stage_instance_id).input_quantity, 0.0);

        // 毡处理可以用领到的量完工
        engine.start(&felt_1.stage_instance_id);
        let felt_done = engine.complete(&felt_1.stage_instance_id, 29.0, 1.0);
        assert_eq!(felt_done.status, StageStatus::Completed);
    }

    // ==========================================
    // 测试2: 完工后不能回到加工中
    // ==========================================

    #[test]
    fn test_completed_cannot_return_to_in_progress() {
        let (_temp_file, engine) = setup_engine();
        let dyeing = engine.produced_stage("LOT-A", ProcessType::Dyeing, 1, 50.0, 45.0, 5.0);

        let err = engine
            .validator
            .request_transition(
                TransitionRequest::new(&dyeing.stage_instance_id, StageStatus::InProgress, ACTOR)
                    .with_notes("重新加工"),
            )
            .unwrap_err();
        match err {
            EngineError::InvalidTransition { from, to, .. } => {
                assert_eq!(from, StageStatus::Completed);
                assert_eq!(to, StageStatus::InProgress);
            }
            other => panic!("Expected InvalidTransition, got {other:?}"),
        }

        let allowed = engine.validator.allowed_actions(&dyeing.stage_instance_id).unwrap();
        assert_eq!(allowed.into_iter().collect::<Vec<_>>(), vec![StageStatus::ReadyForNext]);
    }

    // ==========================================
    // 测试3: 暂停必须填写原因
    // ==========================================

    #[test]
    fn test_hold_without_notes_rejected() {
        let (_temp_file, engine) = setup_engine();
        let stage = engine.register("LOT-A", ProcessType::Printing, 1, 40.0);
        let started = engine.start(&stage.stage_instance_id);

        for notes in [None, Some(""), Some("   ")] {
            let mut request =
                TransitionRequest::new(&stage.stage_instance_id, StageStatus::OnHold, ACTOR);
            request.notes = notes.map(str::to_string);
            let err = engine.validator.request_transition(request).unwrap_err();
            assert!(matches!(err, EngineError::MissingJustification { .. }));
        }

        let current = engine.reload(&stage.stage_instance_id);
        assert_eq!(current.status, StageStatus::InProgress);
        assert_eq!(current.revision, started.revision);

        let held = engine.move_to(&stage.stage_instance_id, StageStatus::OnHold, "等待助剂");
        assert_eq!(held.status, StageStatus::OnHold);
    }

    // ==========================================
    // 测试4: 终态稳定
    // ==========================================

    #[test]
    fn test_terminal_status_rejects_every_target() {
        let (_temp_file, engine) = setup_engine();
        let catalog = StageWorkflowCatalog::standard().unwrap();

        let felt = engine.produced_stage("LOT-B", ProcessType::Felt, 1, 20.0, 18.0, 2.0);
        let cancelled = engine.register("LOT-B", ProcessType::Dyeing, 2, 10.0);
        engine.move_to(&cancelled.stage_instance_id, StageStatus::Cancelled, "订单撤销");

        for stage_id in [&felt.stage_instance_id, &cancelled.stage_instance_id] {
            let stage = engine.reload(stage_id);
            assert!(catalog.is_terminal(stage.process_type, stage.status));

            for to in StageStatus::ALL {
                let result = engine.validator.request_transition(
                    TransitionRequest::new(stage_id, to, ACTOR)
                        .with_notes("尝试")
                        .with_completion(CompletionReport::new(1.0, 0.0)),
                );
                assert!(result.is_err(), "{} → {} 不应成功", stage.status, to);
            }
            assert_eq!(engine.reload(stage_id).revision, stage.revision);
        }
    }

    // ==========================================
    // 测试5: 守恒违反时实例不变
    // ==========================================

    #[test]
    fn test_conservation_violation_leaves_stage_unchanged() {
        let (_temp_file, engine) = setup_engine();
        let stage = engine.register("LOT-C", ProcessType::Washing, 1, 100.0);
        let started = engine.start(&stage.stage_instance_id);

        let err = engine
            .validator
            .request_transition(
                TransitionRequest::new(&stage.stage_instance_id, StageStatus::Completed, ACTOR)
                    .with_notes("完工")
                    .with_completion(CompletionReport::new(95.0, 4.0).with_loss(2.0)),
            )
            .unwrap_err();
        match err {
            EngineError::ConservationViolation { produced, defect, loss, input } => {
                assert_eq!((produced, defect, loss, input), (95.0, 4.0, 2.0, 100.0));
            }
            other => panic!("Expected ConservationViolation, got {other:?}"),
        }

        let current = engine.reload(&stage.stage_instance_id);
        assert_eq!(current.status, StageStatus::InProgress);
        assert_eq!(current.revision, started.revision);
        assert!(current.produced_quantity.is_none());
        assert!(engine.ledger.entries("LOT-C").unwrap().is_empty());
        assert_eq!(engine.audit_log.history(&stage.stage_instance_id).unwrap().len(), 1);

        // 恰好等于投入量可以完工
        let done = engine.complete(&stage.stage_instance_id, 96.0, 4.0);
        assert_eq!(done.accounted_quantity(), 100.0);
    }

    // ==========================================
    // 测试6: 审计完整性
    // ==========================================

    #[test]
    fn test_audit_count_matches_accepted_transitions() {
        let (_temp_file, engine) = setup_engine();
        let stage = engine.register("LOT-D", ProcessType::Dyeing, 1, 60.0);
        let id = stage.stage_instance_id.clone();

        let mut accepted = 0;
        let attempts: Vec<(StageStatus, Option<&str>)> = vec![
            (StageStatus::InProgress, None),                   // ok
            (StageStatus::InProgress, None),                   // 自迁移, 拒绝
            (StageStatus::ChemicalIssue, None),                // 缺原因, 拒绝
            (StageStatus::ChemicalIssue, Some("助剂批次异常")), // ok
            (StageStatus::Completed, Some("跳过")),             // 不可达, 拒绝
            (StageStatus::Rework, Some("回修")),                // ok
            (StageStatus::InProgress, Some("回修开始")),        // ok
        ];
        for (to, notes) in attempts {
            let mut request = TransitionRequest::new(&id, to, ACTOR);
            request.notes = notes.map(str::to_string);
            if engine.validator.request_transition(request).is_ok() {
                accepted += 1;
            }
        }
        assert_eq!(accepted, 4);

        let history = engine.audit_log.history(&id).unwrap();
        assert_eq!(history.len(), accepted);

        let path: Vec<(StageStatus, StageStatus)> =
            history.iter().map(|r| (r.from_status, r.to_status)).collect();
        assert_eq!(
            path,
            vec![
                (StageStatus::Pending, StageStatus::InProgress),
                (StageStatus::InProgress, StageStatus::ChemicalIssue),
                (StageStatus::ChemicalIssue, StageStatus::Rework),
                (StageStatus::Rework, StageStatus::InProgress),
            ]
        );
        assert!(history.windows(2).all(|w| w[0].seq_no < w[1].seq_no));
        assert!(history.iter().all(|r| r.actor_id == ACTOR));
        assert_eq!(history[1].notes.as_deref(), Some("助剂批次异常"));
    }

    // ==========================================
    // 测试7: 时间戳推导
    // ==========================================

    #[test]
    fn test_timing_across_rework_and_ready_for_next() {
        let (_temp_file, engine) = setup_engine();
        let stage = engine.register("LOT-E", ProcessType::Printing, 1, 30.0);
        let id = stage.stage_instance_id.clone();

        let started = engine.start(&id);
        let first_start = started.actual_start_time.unwrap();

        engine.move_to(&id, StageStatus::QualityHold, "色差待判");
        engine.move_to(&id, StageStatus::Rework, "回修");
        let resumed = engine.move_to(&id, StageStatus::InProgress, "回修开始");
        assert_eq!(resumed.actual_start_time, Some(first_start));
        assert!(resumed.actual_end_time.is_none());

        let completed = engine.complete(&id, 28.0, 2.0);
        let end = completed.actual_end_time.unwrap();
        assert!(end >= first_start);
        assert_eq!(completed.actual_duration(), Some(end - first_start));

        let ready = engine.move_to(&id, StageStatus::ReadyForNext, "转下道");
        assert_eq!(ready.actual_end_time, Some(end));
    }

    // ==========================================
    // 测试8: 目录闭包
    // ==========================================

    #[test]
    fn test_catalog_closure_for_every_process_type() {
        let catalog = StageWorkflowCatalog::standard().unwrap();
        for process_type in ProcessType::ALL {
            let statuses = catalog.statuses(process_type);
            assert!(statuses.contains(&StageStatus::Pending));
            for status in &statuses {
                let next = catalog.allowed_next_statuses(process_type, *status);
                assert!(!next.contains(status));
                assert!(next.iter().all(|s| statuses.contains(s)));
            }
        }
    }
}
