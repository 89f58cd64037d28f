// ==========================================
// 持久化失败回滚测试
// ==========================================
// 测试目标: 写入失败时工序保持转换前状态、产能占用得到回补
// ==========================================


#[cfg(test)]
mod persistence_rollback_test {
    use crate::test_helpers::*;
    use garment_flow::domain::{AssignmentPolicy, StepPriority, StepStatus};
    use garment_flow::engine::EngineError;

    fn tee_operators() -> Vec<garment_flow::domain::OperatorCapacity> {
        vec![
            operator("O1", "cutter", 100),
            operator("O2", "overlock", 100).with_skills(["serging"]),
        ]
    }

    #[test]
    fn test_failed_completion_leaves_step_in_progress() {
        let (orch, store) = setup_flaky(AssignmentPolicy::AutoAssign, tee_template(), tee_operators());
        orch.create_workflow("B-RB", "TPL-TEE-V1", 20, StepPriority::Normal)
            .unwrap();
        let cutting = step_of(&orch, "B-RB", "cutting");
        orch.start_step(&cutting.step_id, "O1").unwrap();
        assert_eq!(workload_of(&orch, "O1"), 20);

        store.set_failing(true);
        let err = orch.complete_step(&cutting.step_id, "O1", 20).unwrap_err();
        assert!(matches!(err, EngineError::Repository(_)), "{:?}", err);

        // 内存状态未变,产能已回补
        assert_eq!(status_of(&orch, "B-RB", "cutting"), StepStatus::InProgress);
        assert_eq!(status_of(&orch, "B-RB", "overlock"), StepStatus::Locked);
        assert_eq!(workload_of(&orch, "O1"), 20);
        assert_eq!(workload_of(&orch, "O2"), 0);

        // 恢复后重试成功
        store.set_failing(false);
        let report = orch.complete_step(&cutting.step_id, "O1", 20).unwrap();
        assert_eq!(report.unlocked_step_ids.len(), 1);
        assert_eq!(workload_of(&orch, "O1"), 0);
        assert_eq!(status_of(&orch, "B-RB", "overlock"), StepStatus::Assigned);
    }

    #[test]
    fn test_failed_start_leaves_step_assigned() {
        let (orch, store) = setup_flaky(AssignmentPolicy::AutoAssign, tee_template(), tee_operators());
        orch.create_workflow("B-ST", "TPL-TEE-V1", 10, StepPriority::Normal)
            .unwrap();
        let cutting = step_of(&orch, "B-ST", "cutting");

        store.set_failing(true);
        assert!(orch.start_step(&cutting.step_id, "O1").is_err());
        let after = step_of(&orch, "B-ST", "cutting");
        assert_eq!(after.status, StepStatus::Assigned);
        assert!(after.started_at.is_none());
    }

    #[test]
    fn test_failed_creation_registers_nothing() {
        let (orch, store) = setup_flaky(AssignmentPolicy::AutoAssign, tee_template(), tee_operators());

        store.set_failing(true);
        assert!(orch
            .create_workflow("B-CR", "TPL-TEE-V1", 10, StepPriority::Normal)
            .is_err());
        assert_eq!(orch.active_bundle_count(), 0);
        assert!(orch.get_workflow_status("B-CR").unwrap_err().is_validation());
        assert_eq!(workload_of(&orch, "O1"), 0);

        store.set_failing(false);
        orch.create_workflow("B-CR", "TPL-TEE-V1", 10, StepPriority::Normal)
            .unwrap();
        assert_eq!(status_of(&orch, "B-CR", "cutting"), StepStatus::Assigned);
    }

    #[test]
    fn test_failed_claim_releases_reservation() {
        let (orch, store) = setup_flaky(
            AssignmentPolicy::BroadcastClaim,
            tee_template(),
            tee_operators(),
        );
        orch.create_workflow("B-CL", "TPL-TEE-V1", 15, StepPriority::Normal)
            .unwrap();
        let cutting = step_of(&orch, "B-CL", "cutting");

        store.set_failing(true);
        assert!(orch.claim_step(&cutting.step_id, "O1").is_err());
        assert_eq!(status_of(&orch, "B-CL", "cutting"), StepStatus::Available);
        assert_eq!(workload_of(&orch, "O1"), 0);

        store.set_failing(false);
        orch.claim_step(&cutting.step_id, "O1").unwrap();
        assert_eq!(workload_of(&orch, "O1"), 15);
    }

    #[test]
    fn test_failed_block_restores_reservation() {
        let (orch, store) = setup_flaky(AssignmentPolicy::AutoAssign, tee_template(), tee_operators());
        orch.create_workflow("B-BF", "TPL-TEE-V1", 12, StepPriority::Normal)
            .unwrap();
        let cutting = step_of(&orch, "B-BF", "cutting");

        store.set_failing(true);
        assert!(orch.block_step(&cutting.step_id, "断电").is_err());
        let after = step_of(&orch, "B-BF", "cutting");
        assert_eq!(after.status, StepStatus::Assigned);
        assert_eq!(after.assigned_operator_id.as_deref(), Some("O1"));
        assert_eq!(workload_of(&orch, "O1"), 12);
    }

    #[test]
    fn test_failed_resolve_keeps_step_blocked() {
        let (orch, store) = setup_flaky(AssignmentPolicy::AutoAssign, tee_template(), tee_operators());
        orch.create_workflow("B-DF", "TPL-TEE-V1", 12, StepPriority::Normal)
            .unwrap();
        let cutting = step_of(&orch, "B-DF", "cutting");
        orch.block_step(&cutting.step_id, "换针").unwrap();

        store.set_failing(true);
        assert!(orch
            .resolve_block(&cutting.step_id, StepStatus::Available)
            .is_err());
        assert_eq!(status_of(&orch, "B-DF", "cutting"), StepStatus::Blocked);
        assert_eq!(workload_of(&orch, "O1"), 0);
    }
}
