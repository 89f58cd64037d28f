// ==========================================
// 产能感知分派测试
// ==========================================
// 覆盖: 阈值过滤、候选排序、产能回升重扫、休息/离职、广播补发
// ==========================================


#[cfg(test)]
mod capacity_assignment_test {
    use crate::test_helpers::*;
    use garment_flow::domain::{AssignmentPolicy, NotificationKind, StepPriority, StepStatus};
    use garment_flow::engine::WorkloadChange;

    // ==========================================
    // 阈值与排序
    // ==========================================

    #[test]
    fn test_operator_below_threshold_never_selected() {
        let env = setup_with(
            AssignmentPolicy::AutoAssign,
            tee_template(),
            vec![
                // 可用 18% < 20%
                operator("O-BUSY", "cutter", 50).with_workload(41),
                operator("O-FREE", "cutter", 50),
            ],
        );
        let orch = &env.orchestrator;

        orch.create_workflow("B-T1", "TPL-TEE-V1", 5, StepPriority::Normal)
            .unwrap();
        assert_eq!(
            step_of(orch, "B-T1", "cutting").assigned_operator_id.as_deref(),
            Some("O-FREE")
        );
        assert_eq!(workload_of(orch, "O-BUSY"), 41);
    }

    #[test]
    fn test_highest_available_capacity_wins() {
        let env = setup_with(
            AssignmentPolicy::AutoAssign,
            tee_template(),
            vec![
                operator("O-A", "cutter", 100).with_workload(50),
                operator("O-B", "cutter", 100).with_workload(10),
                operator("O-C", "cutter", 100).with_workload(30),
            ],
        );
        let orch = &env.orchestrator;

        orch.create_workflow("B-R1", "TPL-TEE-V1", 10, StepPriority::Normal)
            .unwrap();
        assert_eq!(
            step_of(orch, "B-R1", "cutting").assigned_operator_id.as_deref(),
            Some("O-B")
        );
        // O-B 升至 20,仍高于 O-C
        orch.create_workflow("B-R2", "TPL-TEE-V1", 10, StepPriority::Normal)
            .unwrap();
        assert_eq!(
            step_of(orch, "B-R2", "cutting").assigned_operator_id.as_deref(),
            Some("O-B")
        );
        // O-B 与 O-C 同为 30,按ID取 O-B
        orch.create_workflow("B-R3", "TPL-TEE-V1", 10, StepPriority::Normal)
            .unwrap();
        assert_eq!(
            step_of(orch, "B-R3", "cutting").assigned_operator_id.as_deref(),
            Some("O-B")
        );
    }

    #[test]
    fn test_exhausted_step_waits_for_capacity() {
        let env = setup_with(
            AssignmentPolicy::AutoAssign,
            tee_template(),
            vec![operator("O1", "cutter", 40).with_workload(40)],
        );
        let orch = &env.orchestrator;

        orch.create_workflow("B-W", "TPL-TEE-V1", 10, StepPriority::Normal)
            .unwrap();
        assert_eq!(status_of(orch, "B-W", "cutting"), StepStatus::Available);

        // 小幅回落未跨越阈值: 不触发重扫
        let update = orch
            .update_operator_capacity("O1", WorkloadChange::Delta(-4))
            .unwrap();
        assert!(!update.crossed_threshold);
        assert_eq!(status_of(orch, "B-W", "cutting"), StepStatus::Available);

        let update = orch
            .update_operator_capacity("O1", WorkloadChange::Absolute(0))
            .unwrap();
        assert!(update.crossed_threshold);
        let cutting = step_of(orch, "B-W", "cutting");
        assert_eq!(cutting.status, StepStatus::Assigned);
        assert_eq!(cutting.assigned_operator_id.as_deref(), Some("O1"));
        assert_eq!(workload_of(orch, "O1"), 10);
    }

    #[test]
    fn test_completion_crossing_threshold_triggers_rescan() {
        let env = setup_with(
            AssignmentPolicy::AutoAssign,
            tee_template(),
            vec![operator("O1", "cutter", 40)],
        );
        let orch = &env.orchestrator;

        for bundle_id in ["B-C1", "B-C2", "B-C3"] {
            orch.create_workflow(bundle_id, "TPL-TEE-V1", 20, StepPriority::Normal)
                .unwrap();
        }
        assert_eq!(workload_of(orch, "O1"), 40);
        assert_eq!(status_of(orch, "B-C1", "cutting"), StepStatus::Assigned);
        assert_eq!(status_of(orch, "B-C2", "cutting"), StepStatus::Assigned);
        assert_eq!(status_of(orch, "B-C3", "cutting"), StepStatus::Available);

        let first = step_of(orch, "B-C1", "cutting");
        orch.start_step(&first.step_id, "O1").unwrap();
        let report = orch.complete_step(&first.step_id, "O1", 20).unwrap();

        assert!(report.rescan_triggered);
        let third = step_of(orch, "B-C3", "cutting");
        assert_eq!(third.status, StepStatus::Assigned);
        assert_eq!(third.assigned_operator_id.as_deref(), Some("O1"));
        assert_eq!(workload_of(orch, "O1"), 40);
    }

    // ==========================================
    // 休息与离职
    // ==========================================

    #[test]
    fn test_break_and_return() {
        let env = setup_with(
            AssignmentPolicy::AutoAssign,
            tee_template(),
            vec![operator("O1", "cutter", 100)],
        );
        let orch = &env.orchestrator;

        assert!(!orch.set_operator_break("O1", true).unwrap());
        orch.create_workflow("B-BRK", "TPL-TEE-V1", 10, StepPriority::Normal)
            .unwrap();
        assert_eq!(status_of(orch, "B-BRK", "cutting"), StepStatus::Available);

        assert!(orch.set_operator_break("O1", false).unwrap());
        let cutting = step_of(orch, "B-BRK", "cutting");
        assert_eq!(cutting.status, StepStatus::Assigned);
        assert_eq!(cutting.assigned_operator_id.as_deref(), Some("O1"));
    }

    #[test]
    fn test_deactivated_operator_not_selected() {
        let env = setup_with(
            AssignmentPolicy::AutoAssign,
            tee_template(),
            vec![operator("O1", "cutter", 100), operator("O2", "cutter", 100)],
        );
        let orch = &env.orchestrator;

        orch.deactivate_operator("O1").unwrap();
        orch.create_workflow("B-DA", "TPL-TEE-V1", 10, StepPriority::Normal)
            .unwrap();
        assert_eq!(
            step_of(orch, "B-DA", "cutting").assigned_operator_id.as_deref(),
            Some("O2")
        );
        assert!(orch.deactivate_operator("NOBODY").unwrap_err().is_validation());
    }

    #[test]
    fn test_late_registered_operator_picks_up_waiting_step() {
        let env = setup_with(AssignmentPolicy::AutoAssign, tee_template(), vec![]);
        let orch = &env.orchestrator;

        orch.create_workflow("B-LATE", "TPL-TEE-V1", 10, StepPriority::Normal)
            .unwrap();
        assert_eq!(status_of(orch, "B-LATE", "cutting"), StepStatus::Available);

        orch.register_operator(operator("O1", "cutter", 100)).unwrap();
        assert_eq!(status_of(orch, "B-LATE", "cutting"), StepStatus::Assigned);
        assert!(orch
            .register_operator(operator("O1", "cutter", 100))
            .unwrap_err()
            .is_validation());
    }

    // ==========================================
    // 广播模式
    // ==========================================

    #[test]
    fn test_broadcast_notifies_only_operators_with_capacity() {
        let mut env = setup_with(
            AssignmentPolicy::BroadcastClaim,
            tee_template(),
            vec![
                operator("O1", "cutter", 40).with_workload(40),
                operator("O2", "cutter", 40),
                operator("O3", "cutter", 40).with_workload(10),
            ],
        );
        let orch = env.orchestrator.clone();

        orch.create_workflow("B-BC", "TPL-TEE-V1", 10, StepPriority::High)
            .unwrap();
        assert_eq!(status_of(&orch, "B-BC", "cutting"), StepStatus::Available);

        let notes = drain(&mut env.receiver);
        let recipients: Vec<&str> = notes.iter().map(|n| n.operator_id.as_str()).collect();
        assert_eq!(recipients, vec!["O2", "O3"]);
        assert!(notes
            .iter()
            .all(|n| n.kind == NotificationKind::SequentialReady && n.priority == StepPriority::High));
        // 广播不占用产能
        assert_eq!(workload_of(&orch, "O2"), 0);

        // O1 产能回升: 仅向 O1 补发
        orch.update_operator_capacity("O1", WorkloadChange::Absolute(0))
            .unwrap();
        let notes = drain(&mut env.receiver);
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].operator_id, "O1");
        assert_eq!(notes[0].kind, NotificationKind::SequentialReady);
    }

    #[test]
    fn test_operator_workload_lists_held_and_eligible_steps() {
        let env = setup_with(
            AssignmentPolicy::BroadcastClaim,
            tee_template(),
            vec![operator("O1", "cutter", 100)],
        );
        let orch = &env.orchestrator;

        orch.create_workflow("B-WL1", "TPL-TEE-V1", 10, StepPriority::Normal)
            .unwrap();
        orch.create_workflow("B-WL2", "TPL-TEE-V1", 10, StepPriority::Normal)
            .unwrap();
        let held = step_of(orch, "B-WL1", "cutting");
        orch.claim_step(&held.step_id, "O1").unwrap();

        let workload = orch.get_operator_workload("O1").unwrap();
        assert_eq!(workload.operator.current_workload, 10);
        assert_eq!(workload.assigned_steps.len(), 1);
        assert_eq!(workload.assigned_steps[0].step_id, held.step_id);
        assert_eq!(workload.eligible_steps.len(), 1);
        assert_eq!(workload.eligible_steps[0].bundle_id, "B-WL2");
    }
}
