//! The session facade as seen through the server: registration, baton
//! movement events and operator messages.

use bcs_core::{ServerEvent, UserMessage};
use bcs_server::fixtures::rig;

#[test]
fn baton_movements_are_published_once_per_change() {
    let rig = rig();
    // The rig registers "console" (alice, level 2) up front.
    let bob = rig
        .server
        .add_facade("remote", "hutch-pc", "bob", "Bob", "cm-1234")
        .expect("register bob");

    assert!(rig.server.request_baton("console"));
    // A repeat request by the holder changes nothing and publishes nothing.
    assert!(rig.server.request_baton("console"));
    // Equal authorisation cannot seize.
    assert!(!rig.server.request_baton("remote"));

    rig.server.return_baton("console");
    assert!(rig.server.request_baton("remote"));

    let alice = rig
        .server
        .client_information("console")
        .expect("alice registered")
        .index;
    assert_eq!(
        rig.observer.baton_holders(),
        vec![Some(alice), None, Some(bob)]
    );
}

#[test]
fn higher_authorisation_seizes_the_baton_through_the_server() {
    let rig = rig();
    rig.server
        .add_facade("remote", "hutch-pc", "carol", "Carol", "cm-1234")
        .expect("register carol");

    assert!(rig.server.request_baton("console"));
    // carol runs at level 3, alice at 2.
    assert!(rig.server.request_baton("remote"));
    assert!(rig.server.am_i_baton_holder("remote"));
    assert!(!rig.server.am_i_baton_holder("console"));
}

#[test]
fn assign_baton_moves_it_to_the_target_client() {
    let rig = rig();
    let bob = rig
        .server
        .add_facade("remote", "hutch-pc", "bob", "Bob", "cm-1234")
        .expect("register bob");

    assert!(rig.server.request_baton("console"));
    rig.server.assign_baton("console", bob);

    assert!(rig.server.am_i_baton_holder("remote"));
    assert_eq!(rig.server.baton_holder().expect("baton held").index, bob);
}

#[test]
fn removing_the_holder_frees_the_baton() {
    let rig = rig();
    rig.server
        .add_facade("remote", "hutch-pc", "bob", "Bob", "cm-1234")
        .expect("register bob");
    assert!(rig.server.request_baton("console"));

    rig.server.remove_facade("console");

    assert!(!rig.server.is_baton_held());
    assert_eq!(rig.observer.baton_holders().last(), Some(&None));
    // Anyone may now take it.
    assert!(rig.server.request_baton("remote"));
}

#[test]
fn messages_carry_the_sender_details() {
    let rig = rig();
    rig.server
        .publish_message("console", "switching to the second sample");
    rig.server.publish_message("ghost", "anyone there?");

    let messages: Vec<UserMessage> = rig
        .observer
        .events()
        .iter()
        .filter_map(|event| match event {
            ServerEvent::Message(message) => Some(message.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].username, "alice");
    assert!(messages[0].source_index.is_some());
    assert_eq!(messages[1].username, "ghost");
    assert_eq!(messages[1].source_index, None);
}

#[test]
fn client_listings_come_back_through_the_facade() {
    let rig = rig();
    rig.server
        .add_facade("remote", "hutch-pc", "bob", "Bob", "cm-1234")
        .expect("register bob");

    assert_eq!(rig.server.all_clients().len(), 2);
    let others = rig.server.other_client_information("console");
    assert_eq!(others.len(), 1);
    assert_eq!(others[0].username, "bob");
    assert!(!others[0].holds_baton);
}
