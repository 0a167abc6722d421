use teleik::configuration::ReducedConfiguration;
use teleik::ik::{solve_ik, FrameTask};
use teleik::scene::build_scene;

fn main() {
    let (mut engine, setup) = build_scene().unwrap();
    let mut configuration = ReducedConfiguration::from_joints(&engine, &setup.left.joints).unwrap();

    let mut task = FrameTask::new(&engine, &setup.left.site, 1.0, 1.0, 1.0).unwrap();
    let mut target = *task.target();
    target.translation.vector.x += 0.05;
    target.translation.vector.z -= 0.1;
    task.set_target(target);

    let dt = 0.005;
    for iteration in 0..500 {
        let velocity = solve_ik(&engine, &configuration, &[task.clone()], dt, &[], 1e-3);
        configuration.integrate(&velocity, dt);
        engine.write_configuration(&configuration);

        let error = task.error(&engine);
        if error.norm() < 1e-6 {
            println!("converged after {iteration} iterations");
            break;
        }
    }

    let site = engine.site_id(&setup.left.site).unwrap();
    let pose = engine.site_pose(site);
    println!("end effector at {:.5}", pose.translation.vector);
    println!("target was     {:.5}", target.translation.vector);
}
