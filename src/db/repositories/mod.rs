mod activity_buckets;
